/*!
    Loopback relay for an embedded stream player.

    A [`PlayerSession`] binds a loopback port, serves a synthesized player
    page plus its bundled assets, proxies cross-origin media requests, and
    turns the page's bridge callbacks into [`PlayerEvent`]s for the host.
*/

pub mod assets;
pub mod bridge;
pub mod config;
mod dispatch;
pub mod error;
pub mod events;
pub mod logging;
pub mod page;
pub mod port;
pub mod proxy;
pub mod session;

pub use assets::{AssetBundle, ResourceDescriptor};
pub use bridge::BridgeEvent;
pub use config::{ProxyMode, RelayConfig};
pub use error::{RelayError, RelayResult};
pub use events::{EventReceiver, EventSender, PlayerEvent, event_channel};
pub use page::StreamKind;
pub use session::{PlayerSession, SessionState, WebView};
