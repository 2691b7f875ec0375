//! Problem bank selection tests

use std::collections::HashSet;
use tutor_common::curriculum::CurriculumStyle;
use tutor_common::db::models::Fingerprint;
use tutor_common::events::ProblemVariant;
use tutor_ps::bank::ProblemBank;

fn addition_fp() -> Fingerprint {
    Fingerprint {
        grade: 4,
        style: CurriculumStyle::CommonCore,
        topic: "Addition".to_string(),
        variant: ProblemVariant::Standard,
    }
}

async fn seeded_bank() -> ProblemBank {
    let pool = tutor_common::db::init_memory_database()
        .await
        .expect("memory db");
    ProblemBank::with_seed(pool, 7)
}

#[tokio::test]
async fn insert_round_trips_and_starts_unserved() {
    let bank = seeded_bank().await;
    let fp = addition_fp();
    let artifact = bank
        .insert(&fp, "What is 3 + 4?", "7", "Count on from 3")
        .await
        .expect("insert");

    assert_eq!(artifact.fingerprint, fp);
    assert_eq!(artifact.question, "What is 3 + 4?");
    assert_eq!(artifact.answer, "7");
    assert_eq!(artifact.times_served, 0);
}

#[tokio::test]
async fn lookup_prefers_least_served_tier() {
    let bank = seeded_bank().await;
    let fp = addition_fp();
    let a = bank.insert(&fp, "q-a", "1", "h").await.expect("insert");
    let b = bank.insert(&fp, "q-b", "2", "h").await.expect("insert");
    let c = bank.insert(&fp, "q-c", "3", "h").await.expect("insert");

    // Push c out of the least-served tier
    for _ in 0..3 {
        bank.record_hit(c.id).await.expect("hit");
    }

    let fresh: HashSet<i64> = [a.id, b.id].into_iter().collect();
    for _ in 0..20 {
        let picked = bank
            .lookup(&fp, &HashSet::new())
            .await
            .expect("lookup")
            .expect("hit");
        assert!(fresh.contains(&picked.id), "served count bias violated");
    }
}

#[tokio::test]
async fn lookup_randomizes_within_tier() {
    let bank = seeded_bank().await;
    let fp = addition_fp();
    let a = bank.insert(&fp, "q-a", "1", "h").await.expect("insert");
    let b = bank.insert(&fp, "q-b", "2", "h").await.expect("insert");

    let mut seen = HashSet::new();
    for _ in 0..50 {
        let picked = bank
            .lookup(&fp, &HashSet::new())
            .await
            .expect("lookup")
            .expect("hit");
        seen.insert(picked.id);
    }
    assert!(seen.contains(&a.id) && seen.contains(&b.id));
}

#[tokio::test]
async fn excluded_ids_are_never_returned() {
    let bank = seeded_bank().await;
    let fp = addition_fp();
    let a = bank.insert(&fp, "q-a", "1", "h").await.expect("insert");
    let b = bank.insert(&fp, "q-b", "2", "h").await.expect("insert");

    // Exclusion beats the serve-count bias: b is the only candidate
    // left even after it has been served
    bank.record_hit(b.id).await.expect("hit");
    let exclude: HashSet<i64> = [a.id].into_iter().collect();
    let picked = bank
        .lookup(&fp, &exclude)
        .await
        .expect("lookup")
        .expect("hit");
    assert_eq!(picked.id, b.id);

    let all: HashSet<i64> = [a.id, b.id].into_iter().collect();
    assert!(bank.lookup(&fp, &all).await.expect("lookup").is_none());
}

#[tokio::test]
async fn fingerprint_fields_partition_the_bank() {
    let bank = seeded_bank().await;
    let fp = addition_fp();
    bank.insert(&fp, "q-a", "1", "h").await.expect("insert");

    let other_topic = Fingerprint {
        topic: "Fractions".to_string(),
        ..addition_fp()
    };
    assert!(bank
        .lookup(&other_topic, &HashSet::new())
        .await
        .expect("lookup")
        .is_none());

    let other_variant = Fingerprint {
        variant: ProblemVariant::Scaffold,
        ..addition_fp()
    };
    assert!(bank
        .lookup(&other_variant, &HashSet::new())
        .await
        .expect("lookup")
        .is_none());

    let other_grade = Fingerprint {
        grade: 3,
        ..addition_fp()
    };
    assert!(bank
        .lookup(&other_grade, &HashSet::new())
        .await
        .expect("lookup")
        .is_none());
}

#[tokio::test]
async fn record_hit_moves_artifact_out_of_tier() {
    let bank = seeded_bank().await;
    let fp = addition_fp();
    let a = bank.insert(&fp, "q-a", "1", "h").await.expect("insert");
    let b = bank.insert(&fp, "q-b", "2", "h").await.expect("insert");

    bank.record_hit(a.id).await.expect("hit");
    let picked = bank
        .lookup(&fp, &HashSet::new())
        .await
        .expect("lookup")
        .expect("hit");
    assert_eq!(picked.id, b.id);
}
