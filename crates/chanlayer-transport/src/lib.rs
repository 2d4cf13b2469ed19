//! In-process publish/subscribe transport.
//!
//! A [`Transport`] is a registry of named endpoints. One [`PubSocket`] binds
//! an endpoint; any number of [`SubSocket`]s connect to it. Frames are text.
//! A subscriber only receives frames that start with one of its filters, and
//! each side enforces a high-water mark: frames past it are dropped, never
//! queued without bound and never blocking the publisher.
//!
//! # Quick start
//!
//! ```rust
//! use chanlayer_transport::{EndpointAddr, Received, Transport};
//!
//! # async fn example() -> Result<(), chanlayer_transport::TransportError> {
//! let transport = Transport::new();
//! let addr: EndpointAddr = "inproc://bus".parse()?;
//!
//! let publisher = transport.bind_publisher(&addr, 1000).await?;
//! let subscriber = transport.connect_subscriber(&addr, 1000).await?;
//! subscriber.subscribe("news|").await;
//!
//! publisher.send("news|{\"headline\":\"hi\"}").await?;
//! assert_eq!(
//!     subscriber.recv().await?,
//!     Received::Frame("news|{\"headline\":\"hi\"}".into())
//! );
//!
//! subscriber.close().await;
//! publisher.close().await;
//! transport.release(&addr).await;
//! # Ok(())
//! # }
//! ```

mod context;
mod endpoint;
mod error;
mod socket;

pub use context::Transport;
pub use endpoint::{EndpointAddr, INPROC_SCHEME};
pub use error::TransportError;
pub use socket::{PubSocket, Received, SendReport, SubSocket};
