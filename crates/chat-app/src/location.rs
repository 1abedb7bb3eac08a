use snafu::Snafu;
use trilha_llm::{BoxFuture, Location};

#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum LocationError {
    #[snafu(display("location is unavailable: {reason}"))]
    Unavailable { stage: &'static str, reason: String },
}

/// Source of the device position used by maps queries.
pub trait LocationProvider: Send + Sync {
    fn resolve<'a>(&'a self) -> BoxFuture<'a, Result<Location, LocationError>>;
}

/// Always reports the same configured position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedLocation(pub Location);

impl LocationProvider for FixedLocation {
    fn resolve<'a>(&'a self) -> BoxFuture<'a, Result<Location, LocationError>> {
        let location = self.0;
        Box::pin(async move { Ok(location) })
    }
}

/// Used when no position source is configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnavailableLocation;

impl LocationProvider for UnavailableLocation {
    fn resolve<'a>(&'a self) -> BoxFuture<'a, Result<Location, LocationError>> {
        Box::pin(async move {
            UnavailableSnafu {
                stage: "resolve-unavailable-location",
                reason: "no location source is configured",
            }
            .fail()
        })
    }
}

/// Progress of device location resolution as seen by maps mode.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum LocationState {
    #[default]
    Pending,
    Resolved(Location),
    Failed(String),
}

impl LocationState {
    pub fn from_result(result: Result<Location, LocationError>) -> Self {
        match result {
            Ok(location) => Self::Resolved(location),
            Err(error) => Self::Failed(error.to_string()),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn location(&self) -> Option<Location> {
        match self {
            Self::Resolved(location) => Some(*location),
            Self::Pending | Self::Failed(_) => None,
        }
    }
}
