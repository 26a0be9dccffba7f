#![forbid(unsafe_code)]

pub mod cache;
pub mod codec;
pub mod item;
pub mod lifecycle;
pub mod record;
pub mod registry;

pub use cache::{DEFAULT_EXPIRY, DEFAULT_SWEEP_INTERVAL, TradeCache};
pub use codec::{
    COMPRESSION_THRESHOLD_BYTES, CodecError, PayloadTag, decode_failures_total, decode_items,
    encode_items, payload_tag, try_decode_items,
};
pub use item::{AIR_KIND, ItemStack, PlayerId};
pub use lifecycle::{TradeState, TransitionResult, UnknownTradeState, evaluate_transition};
pub use record::{RecordError, TradeDocument, TradeRecord, document_fingerprint};
pub use registry::{RegistryMetrics, TradeMeta, TradeRegistry, UNKNOWN_TRADE_STATE};
