pub mod api;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod fetch;
pub mod index;
pub mod path;
pub mod resolver;
pub mod schema;
pub mod serializer;
pub mod utils;
pub mod value;

pub use api::{from_json, parse, to_json, Document};
pub use config::Config;
pub use error::RefError;
pub use events::{ChangeLog, ChangeSink, NoopSink};
pub use index::Index;
pub use resolver::{resolve, ResolveOptions};
pub use serializer::{serialize, SerializeOptions};
pub use value::{LazyStub, Node, Prototype, Value};
