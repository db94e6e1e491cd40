//! Calculator pool: lease-based mutual exclusion over a fixed set of
//! calculator instances, with round-robin preference by case index.
//!
//! Grounded on `fz/core.py::CalculatorManager`: `register_calculator_instances`
//! generates a short id per instance, `acquire_calculator` is a non-blocking
//! try-lock, `get_available_calculator` prefers `case_index % len(ids)` and
//! falls back to a linear scan, `release_calculator` is tolerant of unknown
//! ids.

use std::sync::Mutex;

use uuid::Uuid;

use super::CalculatorSpec;
use crate::error::Error;
use crate::prelude::*;

pub struct CalculatorInstance {
    pub id: String,
    pub spec: CalculatorSpec,
    leased: Mutex<bool>,
}

pub struct CalculatorPool {
    instances: Vec<CalculatorInstance>,
}

/// An acquired lease. Dropping it without calling `release` still frees the
/// slot (the pool only tracks a bool, not a guard), but callers should call
/// `release` explicitly so the scheduler can log which calculator finished.
pub struct Lease<'a> {
    pub instance: &'a CalculatorInstance,
}

impl CalculatorPool {
    pub fn new(specs: Vec<CalculatorSpec>) -> AppResult<Self> {
        if specs.is_empty() {
            return Err(Error::NoCalculators.into());
        }
        let instances = specs
            .into_iter()
            .map(|spec| CalculatorInstance {
                id: Uuid::new_v4().simple().to_string()[..8].to_owned(),
                spec,
                leased: Mutex::new(false),
            })
            .collect();
        Ok(CalculatorPool { instances })
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn specs(&self) -> impl Iterator<Item = &CalculatorSpec> {
        self.instances.iter().map(|inst| &inst.spec)
    }

    /// Non-blocking acquire of a specific instance by id.
    fn try_acquire(&self, id: &str) -> Option<Lease<'_>> {
        let instance = self.instances.iter().find(|inst| inst.id == id)?;
        let mut leased = instance.leased.lock().expect("lease mutex poisoned");
        if *leased {
            None
        } else {
            *leased = true;
            Some(Lease { instance })
        }
    }

    /// Preferred instance for `case_index` is `case_index % len`, falling
    /// back to a linear scan over the rest if that one is busy. Instance ids
    /// in `excluded` (already attempted and failed for this case) are
    /// skipped, mirroring the original's `attempted_calculator_ids` filter —
    /// unless every instance is excluded, in which case the exclusion is
    /// dropped and the full set is tried again, matching the original's
    /// "all calculators have been tried, pick from the original list" reset.
    pub fn acquire_for_case(&self, case_index: usize, excluded: &[String]) -> Option<Lease<'_>> {
        let len = self.instances.len();
        if len == 0 {
            return None;
        }
        let all_excluded = self.instances.iter().all(|inst| excluded.iter().any(|x| x == &inst.id));
        let is_excluded = |id: &str| !all_excluded && excluded.iter().any(|x| x == id);

        let preferred = case_index % len;

        if !is_excluded(&self.instances[preferred].id) {
            if let Some(lease) = self.try_acquire(&self.instances[preferred].id) {
                return Some(lease);
            }
        }

        for offset in 1..len {
            let idx = (preferred + offset) % len;
            if is_excluded(&self.instances[idx].id) {
                continue;
            }
            if let Some(lease) = self.try_acquire(&self.instances[idx].id) {
                return Some(lease);
            }
        }

        None
    }

    pub fn release(&self, lease: Lease<'_>) {
        let mut leased = lease.instance.leased.lock().expect("lease mutex poisoned");
        *leased = false;
    }

    /// Tolerant of an id that's already released or unknown, mirroring the
    /// original's forgiving `release_calculator`.
    pub fn release_by_id(&self, id: &str) {
        if let Some(instance) = self.instances.iter().find(|inst| inst.id == id) {
            *instance.leased.lock().expect("lease mutex poisoned") = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: usize) -> CalculatorPool {
        let specs = (0..n).map(|_| CalculatorSpec::Local { command: None }).collect();
        CalculatorPool::new(specs).unwrap()
    }

    #[test]
    fn round_robin_prefers_case_index_modulo() {
        let pool = pool(3);
        let lease = pool.acquire_for_case(1, &[]).unwrap();
        assert_eq!(lease.instance.id, pool.instances[1].id);
    }

    #[test]
    fn busy_preferred_instance_falls_back_to_scan() {
        let pool = pool(2);
        let first = pool.acquire_for_case(0, &[]).unwrap();
        let second = pool.acquire_for_case(0, &[]).unwrap();
        assert_ne!(first.instance.id, second.instance.id);
    }

    #[test]
    fn all_busy_returns_none() {
        let pool = pool(1);
        let lease = pool.acquire_for_case(0, &[]).unwrap();
        assert!(pool.acquire_for_case(5, &[]).is_none());
        pool.release(lease);
        assert!(pool.acquire_for_case(5, &[]).is_some());
    }

    #[test]
    fn excluded_instance_is_skipped_even_when_free() {
        let pool = pool(2);
        let excluded = vec![pool.instances[0].id.clone()];
        let lease = pool.acquire_for_case(0, &excluded).unwrap();
        assert_eq!(lease.instance.id, pool.instances[1].id);
    }

    #[test]
    fn all_instances_excluded_falls_back_to_full_set() {
        let pool = pool(2);
        let excluded: Vec<String> = pool.instances.iter().map(|inst| inst.id.clone()).collect();
        assert!(pool.acquire_for_case(0, &excluded).is_some());
    }

    #[test]
    fn empty_spec_list_is_an_error() {
        assert!(CalculatorPool::new(vec![]).is_err());
    }
}
