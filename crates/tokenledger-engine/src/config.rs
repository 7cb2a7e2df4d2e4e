//! Engine and webhook configuration.

/// Reservation engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Allow reservations to exceed the available balance (default: false).
    ///
    /// Intended for trusted internal callers that settle out of band; the
    /// cap rule still bounds commits at the reserved amount.
    pub allow_negative_balance: bool,

    /// Reservation time-to-live in seconds before the sweeper may expire it
    /// (default: 900).
    pub reservation_ttl_seconds: i64,

    /// Raw usage units per billing token (default: 1000). Conversions round
    /// up.
    pub units_per_token: i64,

    /// Estimation-time safety factor in percent (default: 120). Applied only
    /// when sizing a hold, never to commit-time actuals.
    pub safety_factor_percent: i64,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            allow_negative_balance: std::env::var("LEDGER_ALLOW_NEGATIVE_BALANCE")
                .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            reservation_ttl_seconds: std::env::var("LEDGER_RESERVATION_TTL_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(900),
            units_per_token: std::env::var("LEDGER_UNITS_PER_TOKEN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            safety_factor_percent: std::env::var("LEDGER_SAFETY_FACTOR_PERCENT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(120),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            allow_negative_balance: false,
            reservation_ttl_seconds: 900,
            units_per_token: 1000,
            safety_factor_percent: 120,
        }
    }
}

/// Webhook verification configuration.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Signing secret shared with the payment provider.
    pub signing_secret: String,

    /// Accepted signature timestamp skew in seconds (default: 300).
    pub tolerance_seconds: i64,
}

impl WebhookConfig {
    /// Create a config with the default tolerance.
    #[must_use]
    pub fn new(signing_secret: impl Into<String>) -> Self {
        Self {
            signing_secret: signing_secret.into(),
            tolerance_seconds: 300,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error when `LEDGER_WEBHOOK_SECRET` is unset; processing
    /// unverified provider notifications is not a supported mode.
    pub fn from_env() -> Result<Self, tokenledger_core::LedgerError> {
        let signing_secret = std::env::var("LEDGER_WEBHOOK_SECRET").map_err(|_| {
            tokenledger_core::LedgerError::Configuration(
                "LEDGER_WEBHOOK_SECRET is not set".into(),
            )
        })?;
        let tolerance_seconds = std::env::var("LEDGER_WEBHOOK_TOLERANCE_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(300);
        Ok(Self {
            signing_secret,
            tolerance_seconds,
        })
    }
}
