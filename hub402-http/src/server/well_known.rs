//! The `/.well-known/x402` catalog of guarded routes.

use serde::{Deserialize, Serialize};

use hub402::proto::{PaymentRequirements, V1, X402Version1};

use super::guard::RouteTable;

/// One guarded route and its payment terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardedRoute {
    /// The `"METHOD path"` route.
    pub route: String,
    /// The terms for paying to access it.
    pub requirements: PaymentRequirements,
}

/// Body of the well-known catalog response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WellKnownCatalog {
    /// Protocol version (always 1).
    pub x402_version: X402Version1,
    /// Every guarded route on this server.
    pub accepts: Vec<GuardedRoute>,
}

/// Renders the catalog for a route table.
#[must_use]
pub fn catalog(routes: &RouteTable) -> WellKnownCatalog {
    WellKnownCatalog {
        x402_version: V1,
        accepts: routes
            .iter()
            .map(|(route, requirements)| GuardedRoute {
                route: route.to_owned(),
                requirements: requirements.clone(),
            })
            .collect(),
    }
}
