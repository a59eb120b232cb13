//! ORM behavior against a real SQLite database.

use serde_json::json;
use strata_core::StrataError;
use strata_db::{
    atomic, FieldDef, FieldType, ModelMeta, Prefetch, Registry, Value, ValuesOptions, Q,
};
use strata_test::{assert_num_queries, TestDatabase};

fn registry() -> Registry {
    Registry::builder()
        .model(
            ModelMeta::builder("Org")
                .field(FieldDef::new("ident", FieldType::Char).max_length(50))
                .build()
                .unwrap(),
        )
        .model(
            ModelMeta::builder("Team")
                .field(FieldDef::foreign_key("org", "Org"))
                .field(FieldDef::new("name", FieldType::Char).max_length(50))
                .build()
                .unwrap(),
        )
        .model(
            ModelMeta::builder("Member")
                .field(FieldDef::foreign_key("team", "Team").nullable())
                .field(FieldDef::new("email", FieldType::Char).max_length(100))
                .build()
                .unwrap(),
        )
        .model(
            ModelMeta::builder("Album")
                .field(FieldDef::new("name", FieldType::Char).max_length(100))
                .build()
                .unwrap(),
        )
        .model(
            ModelMeta::builder("Track")
                .field(FieldDef::foreign_key("album", "Album").related_name("tracks"))
                .field(FieldDef::new("title", FieldType::Char).max_length(100))
                .field(FieldDef::new("position", FieldType::Integer))
                .build()
                .unwrap(),
        )
        .model(
            ModelMeta::builder("User")
                .field(FieldDef::new("name", FieldType::Char).max_length(100))
                .field(FieldDef::new("language", FieldType::Char).max_length(50).nullable())
                .build()
                .unwrap(),
        )
        .model(
            ModelMeta::builder("Node")
                .field(FieldDef::foreign_key("parent", "Node").nullable().related_name("nodes"))
                .field(FieldDef::new("label", FieldType::Char).max_length(50))
                .build()
                .unwrap(),
        )
        .model(
            ModelMeta::builder("Product")
                .field(FieldDef::new("name", FieldType::Char).max_length(100))
                .field(FieldDef::new("data", FieldType::Json).default(json!({})))
                .field(FieldDef::new("created", FieldType::DateTime).auto_now_add())
                .field(FieldDef::new("rating", FieldType::Integer).default(1))
                .build()
                .unwrap(),
        )
        .build()
        .unwrap()
}

async fn setup() -> (TestDatabase, Registry) {
    let registry = registry();
    let db = TestDatabase::new(&registry).unwrap();
    db.create_all().await.unwrap();
    (db, registry)
}

async fn seed_tracks(db: &TestDatabase, registry: &Registry) -> (Value, Value) {
    let albums = registry.query("Album").unwrap();
    let malibu = albums.create([("name", "Malibu")], db).await.unwrap();
    let sequel = albums.create([("name", "Sequel")], db).await.unwrap();
    let tracks = registry.query("Track").unwrap();
    for (album, title, position) in [
        (malibu.pk(), "The Bird", 1),
        (malibu.pk(), "Heart don't stand a chance", 2),
        (malibu.pk(), "The Waters", 3),
        (sequel.pk(), "The Bird", 1),
    ] {
        tracks
            .create(
                [
                    ("album", album.clone()),
                    ("title", Value::from(title)),
                    ("position", Value::from(position)),
                ],
                db,
            )
            .await
            .unwrap();
    }
    (malibu.pk().clone(), sequel.pk().clone())
}

fn titles(rows: &[strata_db::Instance]) -> Vec<String> {
    rows.iter()
        .map(|t| match t.get("title") {
            Some(Value::String(s)) => s.clone(),
            other => panic!("unexpected title {other:?}"),
        })
        .collect()
}

#[tokio::test]
async fn test_chained_filters_match_a_single_conjunction() {
    let (db, registry) = setup().await;
    let (malibu, _) = seed_tracks(&db, &registry).await;
    let tracks = registry.query("Track").unwrap().order_by(["id"]);

    let chained = tracks
        .clone()
        .filter(("album", malibu.clone()))
        .filter(("position__gte", 2))
        .all(&db)
        .await
        .unwrap();
    let combined = tracks
        .filter(Q::from(("album", malibu)) & Q::from(("position__gte", 2)))
        .all(&db)
        .await
        .unwrap();

    assert_eq!(titles(&chained), titles(&combined));
    assert_eq!(titles(&chained), vec!["Heart don't stand a chance", "The Waters"]);
}

#[tokio::test]
async fn test_select_related_keeps_rows_with_null_foreign_key() {
    let (db, registry) = setup().await;
    let org = registry.query("Org").unwrap().create([("ident", "acme")], &db).await.unwrap();
    let team = registry
        .query("Team")
        .unwrap()
        .create([("org", org.pk().clone()), ("name", Value::from("core"))], &db)
        .await
        .unwrap();
    let members = registry.query("Member").unwrap();
    members
        .create([("team", team.pk().clone()), ("email", Value::from("a@x.io"))], &db)
        .await
        .unwrap();
    members
        .create([("team", Value::Null), ("email", Value::from("b@x.io"))], &db)
        .await
        .unwrap();

    let rows = members
        .select_related(["team"])
        .order_by(["email"])
        .all(&db)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);

    let joined = rows[0].related("team").unwrap();
    assert!(joined.is_loaded());
    assert_eq!(joined.instance().unwrap().get("name"), Some(&Value::from("core")));

    let orphan = rows[1].related("team").unwrap();
    assert!(orphan.pk().is_null());
}

#[tokio::test]
async fn test_prefetch_query_count_is_independent_of_parent_count() {
    let (db, registry) = setup().await;
    let albums = registry.query("Album").unwrap();
    let tracks = registry.query("Track").unwrap();

    for n in [1_usize, 10, 100] {
        albums.delete(&db).await.unwrap();
        for i in 0..n {
            let album = albums.create([("name", format!("album {i}"))], &db).await.unwrap();
            tracks
                .create(
                    [
                        ("album", album.pk().clone()),
                        ("title", Value::from("intro")),
                        ("position", Value::from(1)),
                    ],
                    &db,
                )
                .await
                .unwrap();
        }

        assert_num_queries(&db, 2, || async {
            let loaded = albums
                .clone()
                .prefetch_related([Prefetch::new("tracks")])
                .all(&db)
                .await
                .unwrap();
            assert_eq!(loaded.len(), n);
            assert!(loaded.iter().all(|a| a.prefetched("tracks").map(<[_]>::len) == Some(1)));
        })
        .await;
    }
}

#[tokio::test]
async fn test_get_enforces_exactly_one_row() {
    let (db, registry) = setup().await;
    seed_tracks(&db, &registry).await;
    let tracks = registry.query("Track").unwrap();

    let missing = tracks.clone().filter(("title", "Nope")).get(&db).await;
    assert!(matches!(missing, Err(StrataError::ObjectNotFound(_))));

    let several = tracks.clone().filter(("title", "The Bird")).get(&db).await;
    assert!(matches!(several, Err(StrataError::MultipleObjectsReturned(_))));

    let one = tracks.filter(("title", "The Waters")).get(&db).await.unwrap();
    assert_eq!(one.get("position"), Some(&Value::Int(3)));
}

#[tokio::test]
async fn test_update_or_create_creates_then_updates() {
    let (db, registry) = setup().await;
    let users = registry.query("User").unwrap();

    let (user, created) = users
        .update_or_create(
            &[("name", Value::from("Test")), ("language", Value::from("English"))],
            &[("name", Value::from("Jane"))],
            &db,
        )
        .await
        .unwrap();
    assert!(created);
    assert_eq!(user.get("name"), Some(&Value::from("Jane")));

    let (user, created) = users
        .update_or_create(
            &[("name", Value::from("Jane")), ("language", Value::from("English"))],
            &[("language", Value::from("Portuguese"))],
            &db,
        )
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(user.get("language"), Some(&Value::from("Portuguese")));
    assert_eq!(users.count(&db).await.unwrap(), 1);
}

#[tokio::test]
async fn test_bulk_create_applies_defaults_in_insertion_order() {
    let (db, registry) = setup().await;
    let products = registry.query("Product").unwrap();
    let inserted = products
        .bulk_create(
            [
                vec![("name", Value::from("one"))],
                vec![("name", Value::from("two")), ("rating", Value::from(5))],
            ],
            &db,
        )
        .await
        .unwrap();
    assert_eq!(inserted, 2);

    let rows = products.order_by(["id"]).all(&db).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("name"), Some(&Value::from("one")));
    assert_eq!(rows[1].get("name"), Some(&Value::from("two")));
    assert_eq!(rows[0].get("data"), Some(&Value::Json(json!({}))));
    assert_eq!(rows[0].get("rating"), Some(&Value::Int(1)));
    assert_eq!(rows[1].get("rating"), Some(&Value::Int(5)));
    assert!(rows.iter().all(|r| matches!(r.get("created"), Some(Value::DateTime(_)))));
}

#[tokio::test]
async fn test_filtered_delete_only_touches_matching_rows() {
    let (db, registry) = setup().await;
    let (malibu, sequel) = seed_tracks(&db, &registry).await;
    let tracks = registry.query("Track").unwrap();

    let deleted = tracks.clone().filter(("album", malibu.clone())).delete(&db).await.unwrap();
    assert_eq!(deleted, 3);
    assert_eq!(tracks.clone().filter(("album", malibu)).count(&db).await.unwrap(), 0);
    assert_eq!(tracks.filter(("album", sequel)).count(&db).await.unwrap(), 1);
}

#[tokio::test]
async fn test_update_and_delete_through_a_join() {
    let (db, registry) = setup().await;
    let (malibu, sequel) = seed_tracks(&db, &registry).await;
    let tracks = registry.query("Track").unwrap();

    let updated = tracks
        .clone()
        .filter(("album__name", "Malibu"))
        .update([("position", 9)], &db)
        .await
        .unwrap();
    assert_eq!(updated, 3);
    assert_eq!(tracks.clone().filter(("position", 9)).count(&db).await.unwrap(), 3);
    let untouched = tracks.clone().filter(("album", sequel)).get(&db).await.unwrap();
    assert_eq!(untouched.get("position"), Some(&Value::Int(1)));

    let deleted = tracks.clone().filter(("album__name", "Sequel")).delete(&db).await.unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(tracks.clone().count(&db).await.unwrap(), 3);
    assert_eq!(tracks.filter(("album", malibu)).count(&db).await.unwrap(), 3);
}

#[tokio::test]
async fn test_self_referencing_update_targets_the_outer_row() {
    let (db, registry) = setup().await;
    let nodes = registry.query("Node").unwrap();
    let root = nodes
        .create([("parent", Value::Null), ("label", Value::from("root"))], &db)
        .await
        .unwrap();
    let child = nodes
        .create([("parent", root.pk().clone()), ("label", Value::from("child"))], &db)
        .await
        .unwrap();

    let updated = nodes
        .clone()
        .filter(("nodes__label", "child"))
        .update([("label", "parent")], &db)
        .await
        .unwrap();
    assert_eq!(updated, 1);

    let root = nodes.clone().filter(("id", root.pk().clone())).get(&db).await.unwrap();
    assert_eq!(root.get("label"), Some(&Value::from("parent")));
    let child = nodes.clone().filter(("id", child.pk().clone())).get(&db).await.unwrap();
    assert_eq!(child.get("label"), Some(&Value::from("child")));

    let deleted = nodes
        .clone()
        .filter(("parent__label", "parent"))
        .delete(&db)
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(nodes.count(&db).await.unwrap(), 1);
}

#[tokio::test]
async fn test_multi_hop_paths_filter_across_every_join() {
    let (db, registry) = setup().await;
    let orgs = registry.query("Org").unwrap();
    let teams = registry.query("Team").unwrap();
    let members = registry.query("Member").unwrap();

    for (ident, email) in [("acme", "a@acme.io"), ("globex", "b@globex.io")] {
        let org = orgs.create([("ident", ident)], &db).await.unwrap();
        let team = teams
            .create([("org", org.pk().clone()), ("name", Value::from("ops"))], &db)
            .await
            .unwrap();
        members
            .create([("team", team.pk().clone()), ("email", Value::from(email))], &db)
            .await
            .unwrap();
    }

    let found = members
        .clone()
        .filter(("team__org__ident", "globex"))
        .values(&ValuesOptions::fields(["email"]), &db)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("email"), Some(&Value::from("b@globex.io")));

    let both = members
        .filter(("team__name", "ops"))
        .filter(("team__org__ident__startswith", "a"))
        .count(&db)
        .await
        .unwrap();
    assert_eq!(both, 1);
}

#[tokio::test]
async fn test_failed_atomic_block_leaves_no_rows() {
    let (db, registry) = setup().await;
    let albums = registry.query("Album").unwrap();

    let result: Result<(), StrataError> = atomic(&db, |tx| {
        let albums = albums.clone();
        async move {
            albums.create([("name", "Draft")], &tx).await?;
            Err(StrataError::IntegrityError("abort".into()))
        }
    })
    .await;
    assert!(result.is_err());
    assert_eq!(albums.count(&db).await.unwrap(), 0);
}
