use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Server-assigned identifier of an interactive session.
    SessionId
);

string_id!(
    /// Server-assigned identifier of a workbench.
    WorkbenchId
);

string_id!(
    /// Client-generated identifier of a node in a layout tree.
    PanelId
);

impl PanelId {
    /// Fresh panel id. Panel ids only need to be unique within one tree, but
    /// v4 uuids keep re-keyed leaves from ever colliding with persisted ones.
    pub fn generate() -> Self {
        Self(format!("panel-{}", uuid::Uuid::new_v4()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = SessionId::new("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        let back: SessionId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn generated_panel_ids_are_unique() {
        let a = PanelId::generate();
        let b = PanelId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("panel-"));
    }
}
