//! This module contains the [Pool] struct.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::connection_ref::ConnectionRef;
use crate::error::Error;
use crate::error::Result;
use crate::transport::ConnectionInterface;
use crate::transport::WebrtcConnectionState;

/// [Pool] manages all live connections, keyed by signaling session id.
pub struct Pool<C> {
    connections: DashMap<String, Arc<C>>,
}

impl<C> Default for Pool<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Pool<C> {
    /// Create a new [Pool] instance.
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Get a reference of the connection by its session id.
    pub fn connection(&self, sid: &str) -> Result<ConnectionRef<C>> {
        self.connections
            .get(sid)
            .map(|c| ConnectionRef::new(sid, c.value()))
            .ok_or(Error::ConnectionNotFound(sid.to_string()))
    }

    /// Get all the session ids in the pool.
    pub fn connection_ids(&self) -> Vec<String> {
        self.connections.iter().map(|kv| kv.key().clone()).collect()
    }
}

impl<C, S> Pool<C>
where
    C: ConnectionInterface<Error = Error, Sdp = S> + Send + Sync,
    S: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// The `safely_insert` method is used to insert a connection into the pool.
    /// It ensures that the connection is not inserted twice in concurrent scenarios.
    ///
    /// The implementation of match statement refers to Entry::insert in dashmap.
    /// An extra check is added to see if the connection is already viable.
    /// See also: https://docs.rs/dashmap/latest/dashmap/mapref/entry/enum.Entry.html#method.insert
    pub fn safely_insert(&self, sid: &str, conn: C) -> Result<()> {
        let Some(entry) = self.connections.try_entry(sid.to_string()) else {
            return Err(Error::ConnectionAlreadyExists(sid.to_string()));
        };

        match entry {
            Entry::Occupied(mut entry) => {
                let existed_conn = entry.get();
                if matches!(
                    existed_conn.webrtc_connection_state(),
                    WebrtcConnectionState::New
                        | WebrtcConnectionState::Connecting
                        | WebrtcConnectionState::Connected
                ) {
                    return Err(Error::ConnectionAlreadyExists(sid.to_string()));
                }

                entry.insert(Arc::new(conn));
                entry.into_ref()
            }
            Entry::Vacant(entry) => entry.insert(Arc::new(conn)),
        };

        Ok(())
    }

    /// This method closes and releases the connection from pool.
    /// All references to this sid, created by `connection`, will be released.
    /// The [ConnectionInterface] methods of them will return [Error::ConnectionReleased].
    pub async fn safely_remove(&self, sid: &str) -> Result<()> {
        let Some((_, conn)) = self.connections.remove(sid) else {
            return Err(Error::ConnectionNotFound(sid.to_string()));
        };
        conn.close().await
    }
}
