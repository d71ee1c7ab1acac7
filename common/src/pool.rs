//! Admission gate in front of a relational connection pool.
//!
//! Drivers bound the number of open connections but let acquisitions wait
//! without limit. The gate caps in-flight plus waiting requests at
//! `capacity + queue_limit` and fails the rest straight away.

use std::sync::Arc;

use tokio::sync::{ OwnedSemaphorePermit, Semaphore, TryAcquireError };

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
	/// Maximum number of connections executing at once.
	pub capacity: u32,
	/// Maximum number of requests waiting for a connection.
	pub queue_limit: usize,
}

impl Default for PoolLimits {
	fn default() -> Self {
		Self { capacity: 20, queue_limit: 100 }
	}
}

#[derive(Debug, Clone)]
pub struct QueryGate {
	permits: Arc<Semaphore>,
	limits: PoolLimits,
}

impl QueryGate {
	pub fn new(limits: PoolLimits) -> Self {
		let total = (limits.capacity.max(1) as usize).saturating_add(limits.queue_limit);
		Self {
			permits: Arc::new(Semaphore::new(total)),
			limits,
		}
	}

	pub fn limits(&self) -> PoolLimits {
		self.limits
	}

	/// Claim a slot for one query. The slot is released when the permit is
	/// dropped, whether the query succeeded or not.
	pub fn enter(&self) -> Result<OwnedSemaphorePermit, StoreError> {
		Arc::clone(&self.permits)
			.try_acquire_owned()
			.map_err(|e| match e {
				TryAcquireError::NoPermits | TryAcquireError::Closed =>
					StoreError::QueueFull { limit: self.limits.queue_limit },
			})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_beyond_capacity_plus_queue() {
		let gate = QueryGate::new(PoolLimits { capacity: 2, queue_limit: 1 });

		let held: Vec<_> = (0..3).map(|_| gate.enter().unwrap()).collect();
		let err = gate.enter().unwrap_err();
		assert_eq!(err, StoreError::QueueFull { limit: 1 });

		drop(held);
		assert!(gate.enter().is_ok());
	}

	#[test]
	fn zero_capacity_still_admits_one() {
		let gate = QueryGate::new(PoolLimits { capacity: 0, queue_limit: 0 });
		let _permit = gate.enter().unwrap();
		assert!(gate.enter().is_err());
	}
}
