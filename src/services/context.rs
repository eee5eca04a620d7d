//! Process-wide handle to the remote store.

use super::store::{RemoteStore, StoreResult};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::OnceCell;

type Connector = Arc<dyn Fn() -> BoxFuture<'static, StoreResult<Arc<dyn RemoteStore>>> + Send + Sync>;

/// Holds the store client, built at most once and shared afterwards.
///
/// Clones share the same client. The first caller of [`store`](Self::store)
/// runs the connector; concurrent first callers wait for that one result.
#[derive(Clone)]
pub struct StoreContext {
    cell: Arc<OnceCell<Arc<dyn RemoteStore>>>,
    connector: Option<Connector>,
}

impl StoreContext {
    /// A context around an already-built store.
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            cell: Arc::new(OnceCell::new_with(Some(store))),
            connector: None,
        }
    }

    /// A context that builds its store on first use.
    pub fn lazy<F>(connector: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, StoreResult<Arc<dyn RemoteStore>>> + Send + Sync + 'static,
    {
        Self {
            cell: Arc::new(OnceCell::new()),
            connector: Some(Arc::new(connector)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.cell.initialized()
    }

    /// The shared store, connecting first if needed. A failed connection is
    /// not cached; the next call tries again.
    pub async fn store(&self) -> StoreResult<Arc<dyn RemoteStore>> {
        let store = self
            .cell
            .get_or_try_init(|| async {
                match &self.connector {
                    Some(connect) => {
                        tracing::debug!("connecting remote store");
                        connect().await
                    }
                    None => Err(super::store::StoreError::Backend(
                        "store context has no connector".into(),
                    )),
                }
            })
            .await?;
        Ok(Arc::clone(store))
    }
}
