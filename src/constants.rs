//! Protocol constants for La Marzocco machines.
//!
//! Every enum here is a closed set whose values are the strings or integer
//! codes the machines and the cloud speak on the wire.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $value:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $value)]
                $variant,
            )+
        }

        impl $name {
            /// All values, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            pub const fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $value,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($value => Ok($name::$variant),)+
                    _ => Err(Error::InvalidValue(s.to_string())),
                }
            }
        }
    };
}

string_enum! {
    /// Coffee machine models.
    MachineModel {
        Gs3Av => "GS3 AV",
        Gs3Mp => "GS3 MP",
        LineaMini => "Linea Mini",
        LineaMicra => "Micra",
    }
}

impl MachineModel {
    /// Number of physical (programmable) keys on the group.
    pub const fn physical_keys(&self) -> u8 {
        match self {
            MachineModel::Gs3Av => 4,
            MachineModel::Gs3Mp | MachineModel::LineaMini | MachineModel::LineaMicra => 0,
        }
    }
}

string_enum! {
    /// Grinder models.
    GrinderModel {
        Pico => "Pico",
    }
}

string_enum! {
    /// Firmware components that can be updated independently.
    FirmwareType {
        Machine => "machine",
        Gateway => "gateway",
    }
}

string_enum! {
    BoilerType {
        Coffee => "CoffeeBoiler1",
        Steam => "SteamBoiler",
    }
}

string_enum! {
    /// Prebrew/preinfusion mode.
    PrebrewMode {
        Disabled => "Disabled",
        Prebrew => "Enabled",
        Preinfusion => "TypeB",
    }
}

string_enum! {
    WeekDay {
        Monday => "monday",
        Tuesday => "tuesday",
        Wednesday => "wednesday",
        Thursday => "thursday",
        Friday => "friday",
        Saturday => "saturday",
        Sunday => "sunday",
    }
}

string_enum! {
    /// What the smart standby timer counts from.
    SmartStandbyMode {
        LastBrewing => "LastBrewing",
        PowerOn => "PowerOn",
    }
}

/// Physical keys on the group of machines that have them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum PhysicalKey {
    A = 1,
    B = 2,
    C = 3,
    D = 4,
}

impl PhysicalKey {
    pub const ALL: &'static [PhysicalKey] =
        &[PhysicalKey::A, PhysicalKey::B, PhysicalKey::C, PhysicalKey::D];

    pub const fn value(&self) -> u8 {
        *self as u8
    }
}

impl From<PhysicalKey> for u8 {
    fn from(key: PhysicalKey) -> Self {
        key.value()
    }
}

impl TryFrom<u8> for PhysicalKey {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        PhysicalKey::ALL
            .iter()
            .copied()
            .find(|key| key.value() == value)
            .ok_or_else(|| Error::InvalidValue(format!("physical key {}", value)))
    }
}

/// Steam boiler levels, as the device-specific codes the machine expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum SteamLevel {
    Level1 = 126,
    Level2 = 128,
    Level3 = 131,
}

impl SteamLevel {
    pub const ALL: &'static [SteamLevel] =
        &[SteamLevel::Level1, SteamLevel::Level2, SteamLevel::Level3];

    pub const fn value(&self) -> u8 {
        *self as u8
    }
}

impl From<SteamLevel> for u8 {
    fn from(level: SteamLevel) -> Self {
        level.value()
    }
}

impl TryFrom<u8> for SteamLevel {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        SteamLevel::ALL
            .iter()
            .copied()
            .find(|level| level.value() == value)
            .ok_or_else(|| Error::InvalidValue(format!("steam level {}", value)))
    }
}

// Cloud
pub const TOKEN_URL: &str = "https://cms.lamarzocco.io/oauth/v2/token";
pub const CUSTOMER_URL: &str = "https://cms.lamarzocco.io/api/customer";
pub const GW_BASE_URL: &str = "https://gw-lmz.lamarzocco.io/v1/home";
pub const GW_MACHINE_BASE_URL: &str = "https://gw-lmz.lamarzocco.io/v1/home/machines";
pub const GW_AWS_PROXY_BASE_URL: &str = "https://gw-lmz.lamarzocco.io/v1/home/aws-proxy";

pub const DEFAULT_CLIENT_ID: &str = "7_1xwei9rtkuckso44ks4o8s0c0oc4swowo00wgw0ogsok84kosg";
pub const DEFAULT_CLIENT_SECRET: &str = "2mgjqpikbfuok8g4s44oo4gsw0ks44okk4kc4kkkko0c8soc8s";

// Local API
pub const DEFAULT_PORT: u16 = 8081;
pub const WEBSOCKET_RETRY_DELAY: Duration = Duration::from_secs(20);

// Bluetooth
pub const BT_MODEL_PREFIXES: [&str; 4] = ["MICRA", "MINI", "GS3", "LINEA"];
pub const SETTINGS_CHARACTERISTIC: &str = "050b7847-e12b-09a8-b04b-8e0922a9abab";
pub const AUTH_CHARACTERISTIC: &str = "090b7847-e12b-09a8-b04b-8e0922a9abab";

/// Whether an advertised Bluetooth name belongs to a La Marzocco machine.
pub fn is_machine_bluetooth_name(name: &str) -> bool {
    BT_MODEL_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}
