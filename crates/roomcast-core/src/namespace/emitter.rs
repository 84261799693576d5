//! Scoped emitters returned by `to_room` / `to_user`

use super::Namespace;
use serde_json::Value;

/// Delivery scope within a namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Scope {
    All,
    Room(String),
    User(String),
}

/// Emitter performing local delivery plus broker publish for one scope
#[must_use]
pub struct Emitter<'a> {
    namespace: &'a Namespace,
    scope: Scope,
    except: Option<String>,
}

impl<'a> Emitter<'a> {
    pub(crate) fn new(namespace: &'a Namespace, scope: Scope) -> Self {
        Self {
            namespace,
            scope,
            except: None,
        }
    }

    /// Skip one connection, usually the sender
    pub fn except(mut self, conn_id: impl Into<String>) -> Self {
        self.except = Some(conn_id.into());
        self
    }

    /// Deliver locally and publish to other nodes
    ///
    /// Returns the number of local connections written to.
    pub async fn emit(&self, event: &str, data: Value) -> usize {
        self.namespace
            .dispatch(&self.scope, event, data, self.except.as_deref())
            .await
    }
}

impl std::fmt::Debug for Emitter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("namespace", &self.namespace.name())
            .field("scope", &self.scope)
            .field("except", &self.except)
            .finish()
    }
}
