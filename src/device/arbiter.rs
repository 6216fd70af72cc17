//! Exclusive ownership of the shared receiver
//!
//! Only one consumer may drive the dongle at a time. The arbiter records the
//! current owner; it never queues or waits, a rejected caller must retry.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{HubError, Result};

/// Closed set of consumers that can hold the receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Owner {
    /// Direct IQ consumer (spectrum, demodulation, scanning)
    Monitor,
    Aircraft,
    PacketRadio,
    Ism,
    Pager,
    Voice,
    Trunking,
}

impl Owner {
    pub fn as_str(&self) -> &'static str {
        match self {
            Owner::Monitor => "monitor",
            Owner::Aircraft => "aircraft",
            Owner::PacketRadio => "packet_radio",
            Owner::Ism => "ism",
            Owner::Pager => "pager",
            Owner::Voice => "voice",
            Owner::Trunking => "trunking",
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide exclusivity gate over the sample source
#[derive(Debug, Default)]
pub struct DeviceArbiter {
    owner: Mutex<Option<Owner>>,
}

impl DeviceArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Owner>> {
        // The slot is a plain Option; a poisoned lock still holds a valid value
        self.owner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Grant ownership if the receiver is free or already held by `owner`
    pub fn acquire(&self, owner: Owner) -> bool {
        let mut slot = self.slot();
        match *slot {
            None => {
                *slot = Some(owner);
                info!("Receiver acquired by {}", owner);
                true
            }
            Some(current) if current == owner => true,
            Some(current) => {
                debug!("Receiver request by {} rejected, held by {}", owner, current);
                false
            }
        }
    }

    /// Like [`acquire`](Self::acquire) but reports the holder on rejection
    pub fn try_acquire(&self, owner: Owner) -> Result<()> {
        let mut slot = self.slot();
        match *slot {
            None => {
                *slot = Some(owner);
                info!("Receiver acquired by {}", owner);
                Ok(())
            }
            Some(current) if current == owner => Ok(()),
            Some(holder) => Err(HubError::OwnershipDenied {
                requested: owner,
                holder,
            }),
        }
    }

    /// Clear ownership, only if `owner` holds it
    pub fn release(&self, owner: Owner) {
        let mut slot = self.slot();
        if *slot == Some(owner) {
            *slot = None;
            info!("Receiver released by {}", owner);
        }
    }

    pub fn current_owner(&self) -> Option<Owner> {
        *self.slot()
    }

    /// Ok if `owner` currently holds the receiver
    pub fn ensure_held(&self, owner: Owner) -> Result<()> {
        match self.current_owner() {
            Some(current) if current == owner => Ok(()),
            Some(holder) => Err(HubError::OwnershipDenied {
                requested: owner,
                holder,
            }),
            None => Err(HubError::DeviceUnavailable(format!(
                "receiver is not open for {}",
                owner
            ))),
        }
    }
}
