mod parser;
pub mod registry;
pub mod types;

pub use parser::{PolicyParseError, parse_policy};
pub use registry::{PolicyError, PolicyLimits, PolicyRegistry};
pub use types::{ActionDef, AllowedSubject, Policy, RelationDef, ResourceDefinition, Term};
