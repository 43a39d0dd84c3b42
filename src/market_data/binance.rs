// =============================================================================
// Binance connector — the production side of the feed seam
// =============================================================================
//
// Dials the raw `/ws` endpoint, sends one SUBSCRIBE frame for the configured
// stream and yields text payloads. The subscription acknowledgement
// (`{"result":null,"id":…}`) comes back through the same stream and is
// classified by the session's parser like any other control message.
// =============================================================================

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use super::feed::{FeedConnector, FeedError, FeedStream, Subscription};

/// Default spot websocket endpoint.
pub const BINANCE_WS_URL: &str = "wss://stream.binance.com:9443/ws";

/// Dials the exchange and subscribes to the configured stream.
pub struct BinanceConnector {
    url: String,
    next_id: u64,
}

impl BinanceConnector {
    pub fn new() -> Self {
        Self::with_url(BINANCE_WS_URL)
    }

    /// Point the connector at a different endpoint (e.g. the testnet).
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            next_id: 1,
        }
    }
}

impl Default for BinanceConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedConnector for BinanceConnector {
    type Feed = BinanceFeed;

    async fn connect(&mut self, subscription: &Subscription) -> Result<BinanceFeed, FeedError> {
        info!(url = %self.url, stream = %subscription, "connecting to feed WebSocket");

        let (mut ws, _response) = connect_async(self.url.as_str()).await?;

        let frame = subscribe_frame(subscription, self.next_id);
        self.next_id += 1;
        ws.send(Message::Text(frame)).await?;

        info!(stream = %subscription, "feed WebSocket connected, subscription sent");
        Ok(BinanceFeed { ws })
    }
}

/// The SUBSCRIBE request for one stream.
fn subscribe_frame(subscription: &Subscription, id: u64) -> String {
    serde_json::json!({
        "method": "SUBSCRIBE",
        "params": [subscription.stream_name()],
        "id": id,
    })
    .to_string()
}

/// One live websocket connection.
pub struct BinanceFeed {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl FeedStream for BinanceFeed {
    async fn next_message(&mut self) -> Option<Result<String, FeedError>> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text)),
                Some(Ok(Message::Close(frame))) => {
                    debug!(frame = ?frame, "close frame received");
                    return None;
                }
                // Ping / Pong / Binary carry no data for us -- tungstenite
                // answers pings itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => return Some(Err(e.into())),
                None => return None,
            }
        }
    }
}
