//! Time-locked address creation and redemption

pub mod timelock;

pub use timelock::{
    create_locked_address, format_lock_time, lock_address_with_key, validate_lock_time,
    AutoConfirm, Balance, Connector, LockedAddress, RedeemError, RedeemOutcome, RedeemPrompt,
    RedeemSession, RedeemState, TimeLockService, TxDetails, MAX_LOCK_TIME, MIN_LOCK_TIME,
};
