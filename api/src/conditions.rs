use strum::{Display, EnumString, IntoStaticStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum GatewayClassConditionType {
    Accepted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum GatewayClassConditionReason {
    Accepted,
    InvalidParameters,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum GatewayConditionType {
    Accepted,
    Programmed,
    /// Superseded by `Programmed`, still written for older consumers.
    Scheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum GatewayConditionReason {
    Accepted,
    Programmed,
    Scheduled,
    Pending,
    NoResources,
    AddressNotAssigned,
    UnsupportedProtocol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum RouteConditionType {
    Accepted,
    ResolvedRefs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum RouteConditionReason {
    Accepted,
    ResolvedRefs,
    NoMatchingParent,
    NotAllowedByListeners,
    UnsupportedValue,
    BackendNotFound,
    RefNotPermitted,
    InvalidKind,
}
