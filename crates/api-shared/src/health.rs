use crate::dto::HealthRes;

/// Simple health service shared by every outer surface.
///
/// This service provides a standardised way to check the health status of the journal service.
#[derive(Clone, Debug, Default)]
pub struct HealthService;

impl HealthService {
    /// Static method to check health without creating an instance.
    ///
    /// # Returns
    /// A `HealthRes` indicating the service is healthy.
    pub fn check_health() -> HealthRes {
        HealthRes {
            ok: true,
            message: "Patient journal is alive".into(),
        }
    }
}
