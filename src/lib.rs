//! Slot-routing and redirection core for a Redis Cluster client.
//!
//! This crate owns the parts of a cluster client that are independent of the
//! wire protocol: turning a key into a slot, keeping a shared slot map up to
//! date, following `MOVED`/`ASK`/`CLUSTERDOWN` redirects, scattering a
//! pipeline of commands across the nodes that own them and gathering the
//! replies back in submission order, and fanning an admin command out to
//! every master. It does not speak RESP itself — callers plug in their own
//! connection type by implementing [`NodeSession`] and [`Connector`].
//!
//! # Example
//! ```rust,no_run
//! use redis_cluster_route::{ClusterClient, ClusterConfig, Node};
//!
//! # fn connect_to(node: &Node, timeout: std::time::Duration) -> redis_cluster_route::RedisResult<MySession> {
//! #     unimplemented!()
//! # }
//! # struct MySession;
//! # impl redis_cluster_route::NodeSession for MySession {
//! #     fn get_reused_times(&self) -> u32 { 0 }
//! #     fn mark_reused(&mut self) {}
//! #     fn auth(&mut self, _: &str) -> redis_cluster_route::RedisResult<()> { Ok(()) }
//! #     fn set_keepalive(&mut self, _: std::time::Duration, _: usize) -> redis_cluster_route::RedisResult<()> { Ok(()) }
//! #     fn readonly(&mut self) -> redis_cluster_route::RedisResult<()> { Ok(()) }
//! #     fn asking(&mut self) -> redis_cluster_route::RedisResult<()> { Ok(()) }
//! #     fn call(&mut self, _: &str, _: &[Vec<u8>]) -> redis_cluster_route::RedisResult<redis_cluster_route::Value> { unimplemented!() }
//! #     fn cluster_slots(&mut self) -> redis_cluster_route::RedisResult<redis_cluster_route::Value> { unimplemented!() }
//! #     fn cluster_nodes(&mut self) -> redis_cluster_route::RedisResult<String> { unimplemented!() }
//! #     fn init_pipeline(&mut self) {}
//! #     fn commit_pipeline(&mut self) -> redis_cluster_route::RedisResult<Vec<redis_cluster_route::RedisResult<redis_cluster_route::Value>>> { unimplemented!() }
//! # }
//!
//! let config = ClusterConfig::builder("orders", vec![Node::new("127.0.0.1", 7000)]).build();
//! let client = ClusterClient::new(config, connect_to)?;
//! client.call(b"order:42", "GET", &[])?;
//! # Ok::<(), redis_cluster_route::RedisError>(())
//! ```
//!
//! # Pipelining
//! ```rust,no_run
//! # use redis_cluster_route::{ClusterClient, ClusterConfig, Node};
//! # fn doc(client: &ClusterClient<impl redis_cluster_route::NodeSession, impl redis_cluster_route::Connector<impl redis_cluster_route::NodeSession>>) -> redis_cluster_route::RedisResult<()> {
//! client.init_pipeline();
//! client.queue_pipeline(b"order:1", "GET", &[]);
//! client.queue_pipeline(b"order:2", "GET", &[]);
//! let results = client.commit_pipeline()?;
//! # let _ = results;
//! # Ok(())
//! # }
//! ```

mod admin;
mod client;
mod config;
mod error;
mod executor;
mod hash;
mod loader;
mod lock;
mod node;
mod pipeline;
mod selector;
mod session;
mod topology;
mod value;

pub use client::ClusterClient;
pub use config::{ClusterConfig, ClusterConfigBuilder};
pub use error::{ErrorKind, RedisError, RedisResult};
pub use hash::{slot_of, SLOT_SIZE};
pub use lock::{InProcessNamedLock, LockHandle, NamedLock};
pub use node::Node;
pub use pipeline::PipelineExecutor;
pub use selector::ReadPolicy;
pub use session::{ensure_authenticated, Connector, NodeSession, SessionPool};
pub use topology::{MasterList, ServerList, SlotEntry, SlotMap, Topology, TopologyCache};
pub use value::{classify_error, Redirect, Value};
