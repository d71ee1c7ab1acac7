//! Document store access.
//!
//! One client is shared by the whole process. It is created lazily on first
//! use, and concurrent first-time callers wait on the same connection attempt
//! instead of each opening their own.

use std::sync::{ Arc, Mutex, MutexGuard };

use async_trait::async_trait;
use futures::future::{ BoxFuture, FutureExt, Shared };
use tracing::{ debug, info, warn };

use crate::error::StoreError;
use crate::models::{ NewDocumentProduct, StoredDocument };

/// Driver for a concrete document database.
#[async_trait]
pub trait DocumentDriver: Send + Sync + 'static {
	type Client: Clone + Send + Sync + 'static;
	type Collection: DocumentCollection;

	/// Store name, for logs and error messages
	fn store_name(&self) -> &'static str;

	/// Open a client and verify the server answers
	async fn connect(&self) -> Result<Self::Client, StoreError>;

	/// Lightweight liveness probe
	async fn ping(&self, client: &Self::Client) -> Result<(), StoreError>;

	/// Handle to a named collection
	fn collection(&self, client: &Self::Client, name: &str) -> Self::Collection;

	/// Release the client's resources
	async fn close(&self, client: Self::Client);
}

/// Operations the product API needs from a collection.
#[async_trait]
pub trait DocumentCollection: Send + Sync + 'static {
	/// Every document in the collection
	async fn find_all(&self) -> Result<Vec<StoredDocument>, StoreError>;

	/// Insert one product; returns the store-assigned id as a string
	async fn insert_one(&self, product: &NewDocumentProduct) -> Result<String, StoreError>;
}

type PendingConnect<C> = Shared<BoxFuture<'static, Result<C, StoreError>>>;

enum ConnectionState<C> {
	Disconnected,
	Connecting(PendingConnect<C>),
	Connected(C),
}

/// Observable connection phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
	Disconnected,
	Connecting,
	Connected,
}

pub struct DocumentStore<D: DocumentDriver> {
	driver: Arc<D>,
	state: Mutex<ConnectionState<D::Client>>,
}

impl<D: DocumentDriver> DocumentStore<D> {
	pub fn new(driver: D) -> Self {
		Self {
			driver: Arc::new(driver),
			state: Mutex::new(ConnectionState::Disconnected),
		}
	}

	pub fn store_name(&self) -> &'static str {
		self.driver.store_name()
	}

	pub fn phase(&self) -> ConnectionPhase {
		match &*self.lock_state() {
			ConnectionState::Disconnected => ConnectionPhase::Disconnected,
			ConnectionState::Connecting(_) => ConnectionPhase::Connecting,
			ConnectionState::Connected(_) => ConnectionPhase::Connected,
		}
	}

	/// Return the shared client, connecting first if needed. Callers arriving
	/// while an attempt is in flight await that same attempt.
	pub async fn connect(&self) -> Result<D::Client, StoreError> {
		let pending = {
			let mut state = self.lock_state();
			match &*state {
				ConnectionState::Connected(client) => {
					return Ok(client.clone());
				}
				ConnectionState::Connecting(pending) => {
					debug!(store = self.store_name(), "connection already in progress, waiting");
					pending.clone()
				}
				ConnectionState::Disconnected => {
					info!(store = self.store_name(), "connecting");
					let driver = Arc::clone(&self.driver);
					let pending = (async move { driver.connect().await }).boxed().shared();
					*state = ConnectionState::Connecting(pending.clone());
					pending
				}
			}
		};

		let outcome = pending.clone().await;

		// Settle the state only if no close or newer attempt replaced ours.
		let mut state = self.lock_state();
		if let ConnectionState::Connecting(current) = &*state {
			if current.ptr_eq(&pending) {
				*state = match &outcome {
					Ok(client) => {
						info!(store = self.store_name(), "connected");
						ConnectionState::Connected(client.clone())
					}
					Err(e) => {
						warn!(store = self.store_name(), error = %e, "connection failed");
						ConnectionState::Disconnected
					}
				};
			}
		}

		outcome
	}

	/// Collection handle on the current client. Fails when no connection has
	/// been established.
	pub fn get_collection(&self, name: &str) -> Result<D::Collection, StoreError> {
		match &*self.lock_state() {
			ConnectionState::Connected(client) => Ok(self.driver.collection(client, name)),
			_ => Err(StoreError::NotConnected { store: self.store_name() }),
		}
	}

	/// Collection handle, connecting first if needed. Any failure to connect
	/// is reported as the store being unavailable, whatever its cause.
	pub async fn get_collection_safe(&self, name: &str) -> Result<D::Collection, StoreError> {
		let client = self.connect().await.map_err(|e| {
			if e.is_unavailable() {
				e
			} else {
				StoreError::Unavailable {
					store: self.store_name(),
					message: e.to_string(),
				}
			}
		})?;
		Ok(self.driver.collection(&client, name))
	}

	/// Connect if needed, then ping. A failed ping drops the cached client so
	/// the next caller reconnects.
	pub async fn probe(&self) -> Result<(), StoreError> {
		let client = self.connect().await?;

		if let Err(e) = self.driver.ping(&client).await {
			let mut state = self.lock_state();
			if matches!(&*state, ConnectionState::Connected(_)) {
				*state = ConnectionState::Disconnected;
			}
			return Err(e);
		}

		Ok(())
	}

	/// Liveness as a plain flag; never fails.
	pub async fn check_connection(&self) -> bool {
		match self.probe().await {
			Ok(()) => {
				debug!(store = self.store_name(), "ping ok");
				true
			}
			Err(e) => {
				warn!(store = self.store_name(), error = %e, "not responding");
				false
			}
		}
	}

	/// Release the client. An attempt in flight is awaited and its client
	/// released too. Safe to call repeatedly.
	pub async fn close(&self) {
		let previous = std::mem::replace(&mut *self.lock_state(), ConnectionState::Disconnected);

		let client = match previous {
			ConnectionState::Connected(client) => client,
			// The attempt no longer owns the state, so its client is released here.
			ConnectionState::Connecting(pending) =>
				match pending.await {
					Ok(client) => client,
					Err(_) => {
						return;
					}
				}
			ConnectionState::Disconnected => {
				return;
			}
		};

		self.driver.close(client).await;
		info!(store = self.store_name(), "connection closed");
	}

	fn lock_state(&self) -> MutexGuard<'_, ConnectionState<D::Client>> {
		self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}
}
