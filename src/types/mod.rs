pub mod candle;
pub mod position;
pub mod signal;
pub mod timeframe;

pub use candle::Candle;
pub use position::{Position, Trade};
pub use signal::{ExitReason, Side, Signal};
pub use timeframe::TimeFrame;
