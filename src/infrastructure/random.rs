use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::domain::service::RandomSource;

/// ThreadRandomSource はスレッドローカル RNG を使う本番用の乱数源。
pub struct ThreadRandomSource;

impl RandomSource for ThreadRandomSource {
    fn next_f64(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// SeededRandomSource はシード固定の再現可能な乱数源。
pub struct SeededRandomSource {
    rng: Mutex<StdRng>,
}

impl SeededRandomSource {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandomSource {
    fn next_f64(&self) -> f64 {
        match self.rng.lock() {
            Ok(mut rng) => rng.gen::<f64>(),
            Err(poisoned) => poisoned.into_inner().gen::<f64>(),
        }
    }
}

/// FixedRandomSource は常に同じ値を返す。テストや検証用。
pub struct FixedRandomSource(pub f64);

impl RandomSource for FixedRandomSource {
    fn next_f64(&self) -> f64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::domain::entity::{
        ActionType, AlertLevel, DenyReason, MembershipTier, QuotaUsage,
    };
    use crate::domain::service::AdmissionPolicy;

    #[test]
    fn test_thread_source_in_unit_range() {
        let src = ThreadRandomSource;
        for _ in 0..1000 {
            let v = src.next_f64();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn test_seeded_source_is_reproducible() {
        let a = SeededRandomSource::new(7);
        let b = SeededRandomSource::new(7);
        let xs: Vec<f64> = (0..20).map(|_| a.next_f64()).collect();
        let ys: Vec<f64> = (0..20).map(|_| b.next_f64()).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_seeded_basic_block_rate_at_critical() {
        let policy = AdmissionPolicy::new(Arc::new(SeededRandomSource::new(2024)));
        let limits = MembershipTier::Basic.limits();
        let usage = QuotaUsage::default();
        let now = chrono::Utc::now();
        let blocked = (0..10_000)
            .filter(|_| {
                policy
                    .decide(
                        MembershipTier::Basic,
                        &limits,
                        &usage,
                        AlertLevel::Critical,
                        ActionType::ApiCall,
                        now,
                    )
                    .reason
                    == Some(DenyReason::SystemOverload)
            })
            .count();
        let rate = blocked as f64 / 10_000.0;
        assert!((0.75..=0.85).contains(&rate), "block rate {}", rate);
    }
}
