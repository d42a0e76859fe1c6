//! servo-registry: which servo sits in which joint slot, and which protocol family speaks to it

mod types;
pub use types::*;

mod error;
pub use error::{RegistryError, Result};

mod registry;
pub use registry::{Reassignment, ServoRegistry, SlotEntry};

mod loader;
pub use loader::{load_descriptor_file, parse_descriptor};

mod metrics;
pub use metrics::{BusMetrics, MetricsHub};
