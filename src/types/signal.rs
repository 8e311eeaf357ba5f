use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "long" => Some(Side::Long),
            "short" => Some(Side::Short),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Signal,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::Signal => "signal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stop_loss" => Some(ExitReason::StopLoss),
            "take_profit" => Some(ExitReason::TakeProfit),
            "signal" => Some(ExitReason::Signal),
            _ => None,
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trading signal emitted by a strategy.
///
/// Open variants carry everything the executor needs, so a signal can
/// never be "missing" its size or levels; close either targets a specific
/// position or the first open one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Signal {
    OpenLong {
        size_percent: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
    },
    OpenShort {
        size_percent: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
    },
    Close {
        position_id: Option<String>,
    },
}

impl Signal {
    pub fn open_long(size_percent: Decimal, stop_loss: Decimal, take_profit: Decimal) -> Self {
        Signal::OpenLong {
            size_percent,
            stop_loss,
            take_profit,
        }
    }

    pub fn open_short(size_percent: Decimal, stop_loss: Decimal, take_profit: Decimal) -> Self {
        Signal::OpenShort {
            size_percent,
            stop_loss,
            take_profit,
        }
    }

    pub fn close(position_id: Option<String>) -> Self {
        Signal::Close { position_id }
    }

    pub fn side(&self) -> Option<Side> {
        match self {
            Signal::OpenLong { .. } => Some(Side::Long),
            Signal::OpenShort { .. } => Some(Side::Short),
            Signal::Close { .. } => None,
        }
    }
}
