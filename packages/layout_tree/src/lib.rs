//! Layout Tree
//!
//! A workbench arranges its sessions in a tree of panels: leaves hold an
//! ordered set of session tabs, splits divide space between two or more
//! children by ratio. Every operation is a pure clone-and-replace transform,
//! so callers can compute the next tree outside any lock and swap it in.
//!
//! [`reconcile`] brings a persisted tree back in line with the sessions that
//! actually exist on the server. It never fails and is idempotent.

mod error;
mod node;
mod ops;
mod reconcile;

pub use error::LayoutError;
pub use node::{Direction, Leaf, PanelNode, Split};
pub use ops::{MIN_PANE_FRACTION, pixel_delta_to_ratio};
pub use reconcile::reconcile;
