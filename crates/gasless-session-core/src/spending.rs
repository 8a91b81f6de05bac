//! Spending Limit Enforcement
//!
//! Checks a proposed spend against a policy and records usage. Two scopes
//! exist:
//!
//! - **Session scope**: the policy embedded in an owner's [`SessionKey`]
//!   (allow-listed contracts and selectors, daily limit)
//! - **Project scope**: a [`SpendingPolicy`] shared by every spender of a
//!   project, with daily, monthly and per-transaction caps, optional token
//!   and contract allow-lists, and a cooldown between transactions
//!
//! Validation never fails with an error; a denied spend is a
//! [`ValidationResult`] carrying the [`Denial`]. Callers that want `?`
//! convert with [`ValidationResult::into_result`].
//!
//! ## Atomic reservation
//!
//! [`SpendingLimitEnforcer::validate`] followed by
//! [`SpendingLimitEnforcer::record_usage`] is a check-then-act pair: two
//! concurrent spenders can both pass against the same snapshot.
//! [`SpendingLimitEnforcer::try_reserve`] runs both steps under the owner's
//! lock, so cumulative spend never passes the cap. [`SpendingLimitEnforcer::reserve`]
//! does the same and returns a [`Reservation`] that
//! [`SpendingLimitEnforcer::release`] refunds if the spend is never used.
//!
//! ## Example
//!
//! ```rust,ignore
//! let result = enforcer
//!     .try_reserve(&owner, token, TRANSFER_SELECTOR, 6)
//!     .await?;
//! if !result.valid {
//!     println!("denied: {:?}", result.reason);
//! }
//! ```

use crate::events::{EngineEvent, SpendScope};
use crate::session::{Lookup, SessionKey, SessionKeyManager};
use crate::types::{Amount, OwnerId, Selector, amount_string, option_amount_string};
use crate::{Error, Result};
use alloy_primitives::Address;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Why a spend was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    SessionNotFound,
    SessionExpired,
    ContractNotAllowed,
    MethodNotAllowed,
    TokenNotAllowed,
    DailyLimitExceeded,
    MonthlyLimitExceeded,
    PerTransactionLimitExceeded,
    CooldownActive,
}

impl DenialReason {
    /// Whether the denial came from an amount cap
    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            DenialReason::DailyLimitExceeded
                | DenialReason::MonthlyLimitExceeded
                | DenialReason::PerTransactionLimitExceeded
        )
    }
}

/// Denial with the values that caused it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Denial {
    SessionNotFound {
        owner: OwnerId,
    },
    SessionExpired {
        expiration: i64,
    },
    ContractNotAllowed {
        contract: Address,
    },
    MethodNotAllowed {
        #[serde(with = "selector_hex")]
        selector: Selector,
    },
    TokenNotAllowed {
        token: Address,
    },
    DailyLimitExceeded {
        #[serde(with = "amount_string")]
        limit: Amount,
        #[serde(with = "amount_string")]
        spent: Amount,
        #[serde(with = "amount_string")]
        attempted: Amount,
    },
    MonthlyLimitExceeded {
        #[serde(with = "amount_string")]
        limit: Amount,
        #[serde(with = "amount_string")]
        spent: Amount,
        #[serde(with = "amount_string")]
        attempted: Amount,
    },
    PerTransactionLimitExceeded {
        #[serde(with = "amount_string")]
        limit: Amount,
        #[serde(with = "amount_string")]
        attempted: Amount,
    },
    CooldownActive {
        remaining_secs: u64,
    },
}

impl Denial {
    /// Reason code
    pub fn reason(&self) -> DenialReason {
        match self {
            Denial::SessionNotFound { .. } => DenialReason::SessionNotFound,
            Denial::SessionExpired { .. } => DenialReason::SessionExpired,
            Denial::ContractNotAllowed { .. } => DenialReason::ContractNotAllowed,
            Denial::MethodNotAllowed { .. } => DenialReason::MethodNotAllowed,
            Denial::TokenNotAllowed { .. } => DenialReason::TokenNotAllowed,
            Denial::DailyLimitExceeded { .. } => DenialReason::DailyLimitExceeded,
            Denial::MonthlyLimitExceeded { .. } => DenialReason::MonthlyLimitExceeded,
            Denial::PerTransactionLimitExceeded { .. } => DenialReason::PerTransactionLimitExceeded,
            Denial::CooldownActive { .. } => DenialReason::CooldownActive,
        }
    }
}

impl From<Denial> for Error {
    fn from(denial: Denial) -> Self {
        match denial {
            Denial::SessionNotFound { owner } => Error::SessionNotFound(owner.to_string()),
            Denial::SessionExpired { expiration } => {
                Error::SessionExpired(format!("expired at {}", expiration))
            }
            Denial::ContractNotAllowed { contract } => Error::ContractNotAllowed(contract.to_string()),
            Denial::MethodNotAllowed { selector } => {
                Error::MethodNotAllowed(format!("0x{}", hex::encode(selector)))
            }
            Denial::TokenNotAllowed { token } => Error::TokenNotAllowed(token.to_string()),
            Denial::DailyLimitExceeded {
                limit,
                spent,
                attempted,
            } => Error::DailyLimitExceeded {
                limit,
                spent,
                attempted,
            },
            Denial::MonthlyLimitExceeded {
                limit,
                spent,
                attempted,
            } => Error::MonthlyLimitExceeded {
                limit,
                spent,
                attempted,
            },
            Denial::PerTransactionLimitExceeded { limit, attempted } => {
                Error::PerTransactionLimitExceeded { limit, attempted }
            }
            Denial::CooldownActive { remaining_secs } => Error::CooldownActive { remaining_secs },
        }
    }
}

/// Outcome of checking a spend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denial: Option<Denial>,
}

impl ValidationResult {
    /// Spend allowed
    pub fn allowed() -> Self {
        Self {
            valid: true,
            reason: None,
            denial: None,
        }
    }

    /// Spend denied
    pub fn denied(denial: Denial) -> Self {
        Self {
            valid: false,
            reason: Some(denial.reason()),
            denial: Some(denial),
        }
    }

    /// `Ok(())` when valid, the matching error otherwise
    pub fn into_result(self) -> Result<()> {
        match self.denial {
            Some(denial) => Err(denial.into()),
            None => Ok(()),
        }
    }
}

/// Check a spend against a session's own policy
///
/// Order is fixed: expiration, contract, method, daily limit. The first
/// failing check wins.
pub fn validate_session(
    session: &SessionKey,
    target: Address,
    selector: Selector,
    value: Amount,
    now: i64,
) -> ValidationResult {
    if session.is_expired(now) {
        return ValidationResult::denied(Denial::SessionExpired {
            expiration: session.expiration,
        });
    }

    if !session.allowed_contracts.contains(&target) {
        return ValidationResult::denied(Denial::ContractNotAllowed { contract: target });
    }

    if !session.allowed_method_selectors.contains(&selector) {
        return ValidationResult::denied(Denial::MethodNotAllowed { selector });
    }

    if exceeds(session.daily_spent, value, session.spending_limit) {
        return ValidationResult::denied(Denial::DailyLimitExceeded {
            limit: session.spending_limit,
            spent: session.daily_spent,
            attempted: value,
        });
    }

    ValidationResult::allowed()
}

fn exceeds(spent: Amount, value: Amount, limit: Amount) -> bool {
    spent.checked_add(value).is_none_or(|total| total > limit)
}

// ============ Project Scope ============

/// Project-wide spending policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendingPolicy {
    /// Cap on spend per UTC day
    #[serde(with = "amount_string")]
    pub daily_cap: Amount,
    /// Cap on spend per UTC calendar month
    #[serde(default, with = "option_amount_string")]
    pub monthly_cap: Option<Amount>,
    /// Cap on a single transaction
    #[serde(with = "amount_string")]
    pub per_tx_cap: Amount,
    /// Tokens that may be spent; empty allows any
    #[serde(default)]
    pub allowed_tokens: BTreeSet<Address>,
    /// Contracts that may be called; empty allows any
    #[serde(default)]
    pub allowed_contracts: BTreeSet<Address>,
    /// Minimum seconds between recorded transactions
    #[serde(default)]
    pub cooldown_seconds: u64,
}

impl SpendingPolicy {
    /// Policy with only daily and per-transaction caps
    pub fn new(daily_cap: Amount, per_tx_cap: Amount) -> Self {
        Self {
            daily_cap,
            monthly_cap: None,
            per_tx_cap,
            allowed_tokens: BTreeSet::new(),
            allowed_contracts: BTreeSet::new(),
            cooldown_seconds: 0,
        }
    }

    pub fn with_monthly_cap(mut self, cap: Amount) -> Self {
        self.monthly_cap = Some(cap);
        self
    }

    pub fn with_allowed_tokens(mut self, tokens: impl IntoIterator<Item = Address>) -> Self {
        self.allowed_tokens = tokens.into_iter().collect();
        self
    }

    pub fn with_allowed_contracts(mut self, contracts: impl IntoIterator<Item = Address>) -> Self {
        self.allowed_contracts = contracts.into_iter().collect();
        self
    }

    pub fn with_cooldown(mut self, seconds: u64) -> Self {
        self.cooldown_seconds = seconds;
        self
    }
}

/// Usage counters of a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUsage {
    #[serde(with = "amount_string")]
    pub daily_spent: Amount,
    #[serde(with = "amount_string")]
    pub monthly_spent: Amount,
    /// UTC date the counters belong to
    pub last_reset_date: NaiveDate,
    /// Unix time of the last recorded transaction
    pub last_transaction_at: Option<i64>,
}

impl ProjectUsage {
    fn new(today: NaiveDate) -> Self {
        Self {
            daily_spent: 0,
            monthly_spent: 0,
            last_reset_date: today,
            last_transaction_at: None,
        }
    }

    /// Reset counters whose calendar period ended
    fn roll(&mut self, today: NaiveDate) {
        if self.last_reset_date == today {
            return;
        }
        if (self.last_reset_date.year(), self.last_reset_date.month())
            != (today.year(), today.month())
        {
            self.monthly_spent = 0;
        }
        self.daily_spent = 0;
        self.last_reset_date = today;
    }

    fn record(&mut self, amount: Amount, now: i64) {
        self.daily_spent = self.daily_spent.saturating_add(amount);
        self.monthly_spent = self.monthly_spent.saturating_add(amount);
        self.last_transaction_at = Some(now);
    }
}

/// Check a spend against a project policy
///
/// Order: per-transaction cap, token, contract, cooldown, daily cap,
/// monthly cap. `token` is `None` for native value transfers.
pub fn validate_project_spend(
    policy: &SpendingPolicy,
    usage: &ProjectUsage,
    token: Option<Address>,
    target: Address,
    value: Amount,
    now: i64,
) -> ValidationResult {
    if value > policy.per_tx_cap {
        return ValidationResult::denied(Denial::PerTransactionLimitExceeded {
            limit: policy.per_tx_cap,
            attempted: value,
        });
    }

    if let Some(token) = token
        && !policy.allowed_tokens.is_empty()
        && !policy.allowed_tokens.contains(&token)
    {
        return ValidationResult::denied(Denial::TokenNotAllowed { token });
    }

    if !policy.allowed_contracts.is_empty() && !policy.allowed_contracts.contains(&target) {
        return ValidationResult::denied(Denial::ContractNotAllowed { contract: target });
    }

    if policy.cooldown_seconds > 0
        && let Some(last) = usage.last_transaction_at
    {
        let elapsed = now.saturating_sub(last).max(0) as u64;
        if elapsed < policy.cooldown_seconds {
            return ValidationResult::denied(Denial::CooldownActive {
                remaining_secs: policy.cooldown_seconds - elapsed,
            });
        }
    }

    if exceeds(usage.daily_spent, value, policy.daily_cap) {
        return ValidationResult::denied(Denial::DailyLimitExceeded {
            limit: policy.daily_cap,
            spent: usage.daily_spent,
            attempted: value,
        });
    }

    if let Some(monthly_cap) = policy.monthly_cap
        && exceeds(usage.monthly_spent, value, monthly_cap)
    {
        return ValidationResult::denied(Denial::MonthlyLimitExceeded {
            limit: monthly_cap,
            spent: usage.monthly_spent,
            attempted: value,
        });
    }

    ValidationResult::allowed()
}

/// Spend held against a session until it is used or released
///
/// Carries the session record the spend was validated against; callers
/// sign with exactly that key.
#[derive(Debug, Clone)]
pub struct Reservation {
    owner: OwnerId,
    amount: Amount,
    session: SessionKey,
}

impl Reservation {
    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    /// Session record after the spend was added
    pub fn session(&self) -> &SessionKey {
        &self.session
    }
}

#[derive(Debug)]
struct ProjectLedger {
    policy: SpendingPolicy,
    usage: ProjectUsage,
}

/// Enforces session and project spending policies
pub struct SpendingLimitEnforcer {
    sessions: Arc<SessionKeyManager>,
    projects: DashMap<String, Arc<Mutex<ProjectLedger>>>,
}

impl SpendingLimitEnforcer {
    /// Create an enforcer over `sessions`' store, clock and event bus
    pub fn new(sessions: Arc<SessionKeyManager>) -> Self {
        Self {
            sessions,
            projects: DashMap::new(),
        }
    }

    // ============ Session Scope ============

    /// Check a spend against `session` without recording anything
    pub fn validate(
        &self,
        session: &SessionKey,
        target: Address,
        selector: Selector,
        value: Amount,
    ) -> ValidationResult {
        validate_session(
            session,
            target,
            selector,
            value,
            self.sessions.clock().unix_now(),
        )
    }

    /// Check a spend against `owner`'s current session
    ///
    /// Loads through the session manager, so an expired session is evicted
    /// and a stale daily counter is reset before checking.
    pub async fn check(
        &self,
        owner: &OwnerId,
        target: Address,
        selector: Selector,
        value: Amount,
    ) -> Result<ValidationResult> {
        let _guard = self.sessions.locks().lock(owner).await;
        let now = self.sessions.clock().now();
        let result = match self.active_or_denial(owner, now).await? {
            Ok(session) => validate_session(&session, target, selector, value, now.timestamp()),
            Err(denial) => ValidationResult::denied(denial),
        };
        self.notify_limit(SpendScope::Session { owner: owner.clone() }, &result, value);
        Ok(result)
    }

    /// Add `amount` to `owner`'s daily spend without validating
    ///
    /// Returns `false` when the owner has no active session.
    pub async fn record_usage(&self, owner: &OwnerId, amount: Amount) -> Result<bool> {
        let _guard = self.sessions.locks().lock(owner).await;
        let now = self.sessions.clock().now();

        let Some(mut session) = self.sessions.load_active(owner, now).await? else {
            return Ok(false);
        };
        session.daily_spent = session.daily_spent.saturating_add(amount);
        self.sessions.store().save(owner, &session).await?;

        debug!(%owner, amount, daily_spent = session.daily_spent, "Recorded usage");
        Ok(true)
    }

    /// Validate and record in one step under the owner lock
    pub async fn try_reserve(
        &self,
        owner: &OwnerId,
        target: Address,
        selector: Selector,
        value: Amount,
    ) -> Result<ValidationResult> {
        Ok(match self.reserve(owner, target, selector, value).await? {
            Ok(_) => ValidationResult::allowed(),
            Err(denial) => ValidationResult::denied(denial),
        })
    }

    /// Same as [`try_reserve`](Self::try_reserve), but hands back the
    /// [`Reservation`] so an unused spend can be released later
    pub async fn reserve(
        &self,
        owner: &OwnerId,
        target: Address,
        selector: Selector,
        value: Amount,
    ) -> Result<std::result::Result<Reservation, Denial>> {
        let _guard = self.sessions.locks().lock(owner).await;
        let now = self.sessions.clock().now();

        let mut session = match self.active_or_denial(owner, now).await? {
            Ok(session) => session,
            Err(denial) => return Ok(Err(denial)),
        };

        let result = validate_session(&session, target, selector, value, now.timestamp());
        if let Some(denial) = result.denial.clone() {
            info!(%owner, %target, value, reason = ?result.reason, "Spend denied");
            self.notify_limit(SpendScope::Session { owner: owner.clone() }, &result, value);
            return Ok(Err(denial));
        }

        session.daily_spent += value;
        self.sessions.store().save(owner, &session).await?;
        debug!(%owner, value, daily_spent = session.daily_spent, "Reserved spend");

        Ok(Ok(Reservation {
            owner: owner.clone(),
            amount: value,
            session,
        }))
    }

    /// Return a reservation that was not used
    ///
    /// Refunds only while the reserving session is still the owner's active
    /// session and its daily counter still belongs to the day the spend was
    /// reserved on. Returns whether anything was refunded.
    pub async fn release(&self, reservation: &Reservation) -> Result<bool> {
        let owner = &reservation.owner;
        let _guard = self.sessions.locks().lock(owner).await;
        let now = self.sessions.clock().now();

        let Some(mut session) = self.sessions.load_active(owner, now).await? else {
            return Ok(false);
        };
        if session.public_address != reservation.session.public_address
            || session.last_reset_date != reservation.session.last_reset_date
        {
            debug!(%owner, amount = reservation.amount, "Reservation is stale, nothing released");
            return Ok(false);
        }

        session.daily_spent = session.daily_spent.saturating_sub(reservation.amount);
        self.sessions.store().save(owner, &session).await?;

        debug!(
            %owner,
            amount = reservation.amount,
            daily_spent = session.daily_spent,
            "Released reservation"
        );
        Ok(true)
    }

    async fn active_or_denial(
        &self,
        owner: &OwnerId,
        now: DateTime<Utc>,
    ) -> Result<std::result::Result<SessionKey, Denial>> {
        Ok(match self.sessions.lookup(owner, now).await? {
            Lookup::Active(session) => Ok(session),
            Lookup::Expired(session) => Err(Denial::SessionExpired {
                expiration: session.expiration,
            }),
            Lookup::Missing => Err(Denial::SessionNotFound {
                owner: owner.clone(),
            }),
        })
    }

    // ============ Project Scope ============

    /// Install or replace a project's policy; existing usage is kept
    pub async fn set_project_policy(&self, project: impl Into<String>, policy: SpendingPolicy) {
        let project = project.into();
        let today = self.sessions.clock().today();

        let ledger = self
            .projects
            .entry(project.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(ProjectLedger {
                    policy: policy.clone(),
                    usage: ProjectUsage::new(today),
                }))
            })
            .clone();
        ledger.lock().await.policy = policy;
        info!(project, "Project policy set");
    }

    /// Remove a project's policy and usage
    pub fn remove_project(&self, project: &str) -> bool {
        self.projects.remove(project).is_some()
    }

    /// Current policy of a project
    pub async fn project_policy(&self, project: &str) -> Result<SpendingPolicy> {
        let ledger = self.ledger(project)?;
        let ledger = ledger.lock().await;
        Ok(ledger.policy.clone())
    }

    /// Current usage of a project, rolled to today
    pub async fn project_usage(&self, project: &str) -> Result<ProjectUsage> {
        let ledger = self.ledger(project)?;
        let mut ledger = ledger.lock().await;
        ledger.usage.roll(self.sessions.clock().today());
        Ok(ledger.usage.clone())
    }

    /// Check a spend against a project policy without recording it
    pub async fn validate_project(
        &self,
        project: &str,
        token: Option<Address>,
        target: Address,
        value: Amount,
    ) -> Result<ValidationResult> {
        let ledger = self.ledger(project)?;
        let mut ledger = ledger.lock().await;
        let clock = self.sessions.clock();
        ledger.usage.roll(clock.today());

        let result =
            validate_project_spend(&ledger.policy, &ledger.usage, token, target, value, clock.unix_now());
        self.notify_limit(
            SpendScope::Project {
                project: project.to_string(),
            },
            &result,
            value,
        );
        Ok(result)
    }

    /// Add `amount` to a project's counters without validating
    ///
    /// Returns `false` when the project has no policy.
    pub async fn record_project_usage(&self, project: &str, amount: Amount) -> Result<bool> {
        let Ok(ledger) = self.ledger(project) else {
            return Ok(false);
        };
        let mut ledger = ledger.lock().await;
        let clock = self.sessions.clock();
        ledger.usage.roll(clock.today());
        ledger.usage.record(amount, clock.unix_now());

        debug!(project, amount, daily_spent = ledger.usage.daily_spent, "Recorded project usage");
        Ok(true)
    }

    /// Validate and record a project spend in one step
    pub async fn try_reserve_project(
        &self,
        project: &str,
        token: Option<Address>,
        target: Address,
        value: Amount,
    ) -> Result<ValidationResult> {
        let ledger = self.ledger(project)?;
        let mut ledger = ledger.lock().await;
        let clock = self.sessions.clock();
        let now = clock.unix_now();
        ledger.usage.roll(clock.today());

        let result = validate_project_spend(&ledger.policy, &ledger.usage, token, target, value, now);
        if result.valid {
            ledger.usage.record(value, now);
            debug!(project, value, daily_spent = ledger.usage.daily_spent, "Reserved project spend");
        } else {
            info!(project, %target, value, reason = ?result.reason, "Project spend denied");
            self.notify_limit(
                SpendScope::Project {
                    project: project.to_string(),
                },
                &result,
                value,
            );
        }
        Ok(result)
    }

    fn ledger(&self, project: &str) -> Result<Arc<Mutex<ProjectLedger>>> {
        self.projects
            .get(project)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::ProjectNotFound(project.to_string()))
    }

    fn notify_limit(&self, scope: SpendScope, result: &ValidationResult, attempted: Amount) {
        if let Some(reason) = result.reason
            && reason.is_limit()
        {
            self.sessions.events().publish(
                self.sessions.clock().now(),
                EngineEvent::SpendingLimitReached {
                    scope,
                    reason,
                    attempted,
                },
            );
        }
    }
}

impl std::fmt::Debug for SpendingLimitEnforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpendingLimitEnforcer")
            .field("projects", &self.projects.len())
            .finish()
    }
}

mod selector_hex {
    use crate::types::Selector;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(selector: &Selector, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(selector)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Selector, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        crate::types::parse_selector(&s).map_err(serde::de::Error::custom)
    }
}
