mod common;

use serde_json::json;

use rating_engine::collections::{CollectionDefinition, CollectionFieldSpec};
use rating_engine::core::{ElementId, RatingId, UserId};
use rating_engine::fields::FieldDefinition;
use rating_engine::ratings::query::{parse_base_param, Join, ParamValue};
use rating_engine::ratings::{Direction, Rating, RatingStatus};

#[tokio::test]
async fn stats_over_a_collection() {
    let t = common::engine().await;
    let (collection, _quality) = common::reviews(&t.engine).await;
    for (element, quality) in [(1, 2.0), (2, 4.0), (3, 4.0)] {
        common::rate(&t.engine, &collection, element, quality).await;
    }

    let stats = t.engine.ratings().find().collection(&collection).stats();
    assert_eq!(stats.average(Some("quality")).await.unwrap(), Some(10.0 / 3.0));
    assert_eq!(stats.count(Some("quality")).await.unwrap(), 3);
    assert_eq!(stats.max(Some("quality")).await.unwrap(), Some(4.0));
    assert_eq!(stats.min(Some("quality")).await.unwrap(), Some(2.0));
    assert_eq!(stats.sum(Some("quality")).await.unwrap(), Some(10.0));
    assert_eq!(stats.count(None).await.unwrap(), 3);
    assert_eq!(stats.average(None).await.unwrap(), None);

    let scoped = t
        .engine
        .ratings()
        .find()
        .element("blog/second")
        .stats()
        .with_default_field("quality");
    assert_eq!(scoped.average(None).await.unwrap(), Some(4.0));

    let err = stats.average(Some("speed")).await.unwrap_err();
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn stats_ignore_paging() {
    let t = common::engine().await;
    let (collection, _quality) = common::reviews(&t.engine).await;
    for (element, quality) in [(1, 1.0), (2, 3.0), (3, 5.0)] {
        common::rate(&t.engine, &collection, element, quality).await;
    }

    let query = t.engine.ratings().find().limit(1);
    assert_eq!(query.all().await.unwrap().len(), 1);
    assert_eq!(query.count().await.unwrap(), 3);
    assert_eq!(query.stats().average(Some("quality")).await.unwrap(), Some(3.0));
}

#[test]
fn base_params_split_join_and_values() {
    let param = parse_base_param(json!(["and", 5, 7]));
    assert_eq!(param.join, Join::And);
    assert_eq!(param.values, vec![ParamValue::Int(5), ParamValue::Int(7)]);

    let param = parse_base_param(json!({"id": 9}));
    assert_eq!(param.join, Join::Or);
    assert_eq!(param.values, vec![ParamValue::Int(9)]);
}

#[tokio::test]
async fn relation_filters_accept_ids_keys_and_entities() {
    let t = common::engine().await;
    let (collection, _quality) = common::reviews(&t.engine).await;
    let first = common::rate(&t.engine, &collection, 1, 3.0).await;
    let owned = t
        .engine
        .ratings()
        .create(
            Rating::new(collection.id, ElementId::new(2))
                .with_owner(Some(UserId::new(2)))
                .with_value("quality", 5.0),
        )
        .await
        .unwrap();
    let first_id = first.id.unwrap();
    let owned_id = owned.id.unwrap();

    let ratings = t.engine.ratings();
    assert_eq!(ratings.find().collection("reviews").count().await.unwrap(), 2);
    assert_eq!(ratings.find().collection(collection.id).count().await.unwrap(), 2);
    assert_eq!(ratings.find().element("blog/first").ids().await.unwrap(), vec![first_id]);
    assert_eq!(ratings.find().element(2i64).ids().await.unwrap(), vec![owned_id]);
    assert_eq!(ratings.find().owner("ben").ids().await.unwrap(), vec![owned_id]);
    assert_eq!(ratings.find().owner("ben@example.com").ids().await.unwrap(), vec![owned_id]);
    assert_eq!(ratings.find().owner(ParamValue::Null).ids().await.unwrap(), vec![first_id]);
    assert_eq!(ratings.find().owner(":notempty:").ids().await.unwrap(), vec![owned_id]);
    assert_eq!(
        ratings.find().element(vec!["blog/first", "blog/second"]).count().await.unwrap(),
        2
    );
    assert_eq!(ratings.find().element(json!(["and", 1, 2])).count().await.unwrap(), 0);
    assert_eq!(ratings.find().id(json!({"id": first_id.value()})).ids().await.unwrap(), vec![first_id]);
}

#[tokio::test]
async fn unresolved_lookups_match_nothing_unless_negated() {
    let t = common::engine().await;
    let (collection, _quality) = common::reviews(&t.engine).await;
    common::rate(&t.engine, &collection, 1, 3.0).await;

    let ratings = t.engine.ratings();
    assert_eq!(ratings.find().collection("missing").count().await.unwrap(), 0);
    assert_eq!(ratings.find().collection("not missing").count().await.unwrap(), 1);
    assert_eq!(ratings.find().owner("nobody").count().await.unwrap(), 0);
    assert_eq!(ratings.find().element("!=blog/nowhere").count().await.unwrap(), 1);
}

#[tokio::test]
async fn operators_and_wildcards() {
    let t = common::engine().await;
    let (collection, _quality) = common::reviews(&t.engine).await;
    let mut ids = Vec::new();
    for (element, name) in [(1, "Kim"), (2, "Kira"), (3, "Lee")] {
        let rating = t
            .engine
            .ratings()
            .create(
                Rating::new(collection.id, ElementId::new(element))
                    .with_name(name)
                    .with_email(format!("{}@example.com", name.to_lowercase()))
                    .with_value("quality", 3.0),
            )
            .await
            .unwrap();
        ids.push(rating.id.unwrap());
    }

    let ratings = t.engine.ratings();
    assert_eq!(ratings.find().name("Ki*").count().await.unwrap(), 2);
    assert_eq!(ratings.find().name("not Ki*").count().await.unwrap(), 1);
    assert_eq!(ratings.find().email("lee@example.com").ids().await.unwrap(), vec![ids[2]]);
    assert_eq!(ratings.find().name(":notempty:").count().await.unwrap(), 3);
    assert_eq!(ratings.find().name(ParamValue::Null).count().await.unwrap(), 0);

    let at_least_second = format!(">= {}", ids[1]);
    assert_eq!(ratings.find().id(at_least_second).count().await.unwrap(), 2);
    let not_first = format!("not {}", ids[0]);
    assert_eq!(ratings.find().id(not_first).count().await.unwrap(), 2);
    assert_eq!(
        ratings.find().id(json!(["and", format!(">{}", ids[0]), format!("<{}", ids[2])])).ids().await.unwrap(),
        vec![ids[1]]
    );
}

#[tokio::test]
async fn status_filter_defaults_to_active() {
    let t = common::engine().await;
    let (collection, _quality) = common::reviews(&t.engine).await;
    let active = common::rate(&t.engine, &collection, 1, 3.0).await.id.unwrap();
    let pending = common::rate(&t.engine, &collection, 2, 3.0).await.id.unwrap();
    t.engine.ratings().pending(pending).await.unwrap();

    let ratings = t.engine.ratings();
    assert_eq!(ratings.find().ids().await.unwrap(), vec![active]);
    assert_eq!(ratings.find().status(RatingStatus::Pending).ids().await.unwrap(), vec![pending]);
    assert_eq!(ratings.find().status("any").count().await.unwrap(), 2);
    assert_eq!(ratings.find().status(ParamValue::Null).count().await.unwrap(), 2);
    assert_eq!(ratings.find().status(vec!["active", "pending"]).count().await.unwrap(), 2);
}

#[tokio::test]
async fn ordering_paging_and_sequence_links() {
    let t = common::engine().await;
    let (collection, _quality) = common::reviews(&t.engine).await;
    let low = common::rate(&t.engine, &collection, 1, 1.0).await.id.unwrap();
    let high = common::rate(&t.engine, &collection, 2, 5.0).await.id.unwrap();
    let mid = common::rate(&t.engine, &collection, 3, 3.0).await.id.unwrap();

    let ratings = t.engine.ratings();
    assert_eq!(ratings.find().ids().await.unwrap(), vec![mid, high, low]);

    let by_quality = ratings.find().order_by("quality", Direction::Desc);
    let results = by_quality.all().await.unwrap();
    assert_eq!(results.ids(), vec![high, mid, low]);

    let middle = results.get(mid).unwrap();
    assert_eq!(results.prev_of(middle).and_then(|r| r.id), Some(high));
    assert_eq!(results.next_of(middle).and_then(|r| r.id), Some(low));
    let first = results.first().unwrap();
    assert_eq!(first.sequence.unwrap().prev, None);
    assert_eq!(results.iter().last().unwrap().sequence.unwrap().next, None);

    assert_eq!(by_quality.clone().limit(2).ids().await.unwrap(), vec![high, mid]);
    assert_eq!(by_quality.clone().offset(1).ids().await.unwrap(), vec![mid, low]);
    assert_eq!(by_quality.clone().offset(1).limit(1).ids().await.unwrap(), vec![mid]);

    let one = ratings.find().order_by("id", Direction::Asc).one().await.unwrap().unwrap();
    assert_eq!(one.id, Some(low));

    let err = ratings.find().order_by("nonsense", Direction::Asc).all().await.unwrap_err();
    assert!(err.validation_errors().unwrap().has("orderBy"));
}

#[tokio::test]
async fn hydration_maps_each_collection_to_its_own_fields() {
    let t = common::engine().await;
    let (reviews, quality) = common::reviews(&t.engine).await;
    let sharpness = t
        .engine
        .fields()
        .create(FieldDefinition::new("sharpness", "Sharpness").with_range(0.0, 10.0))
        .await
        .unwrap();
    let photos = t
        .engine
        .collections()
        .create(
            CollectionDefinition::new("photos", "Photos", "asset"),
            vec![CollectionFieldSpec::required(sharpness.id), quality.id.into()],
        )
        .await
        .unwrap();

    common::rate(&t.engine, &reviews, 1, 4.0).await;
    t.engine
        .ratings()
        .create(Rating::new(photos.id, ElementId::new(50)).with_value("sharpness", 7.0))
        .await
        .unwrap();

    let results = t.engine.ratings().find().order_by("id", Direction::Asc).all().await.unwrap();
    let listed: Vec<&Rating> = results.iter().collect();
    let (review, photo) = (listed[0], listed[1]);
    assert!(!review.values.contains("sharpness"));
    assert_eq!(review.value("quality"), Some(4.0));
    assert_eq!(photo.value("sharpness"), Some(7.0));
    assert!(photo.values.contains("quality"));
    assert_eq!(photo.value("quality"), None);

    let missing = t.engine.ratings().find_by_id(RatingId::new(999)).await.unwrap();
    assert!(missing.is_none());
}
