//! Configuration loader: config.toml, then .env, then environment overrides.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use candidate_engine::nadfun::{MAINNET_API_URL, TESTNET_API_URL};
use decision_engine::{Role, DEFAULT_MIN_YES_VOTES, DEFAULT_VOTE_THRESHOLD};

/// Tokens the crawl starts from when nothing else is configured.
pub const SEED_TOKENS: [&str; 8] = [
    "0x64F1416846cb28C805D7D82Dc49B81aB51567777",
    "0x86c68d4FE7836A9FA13C88E8Ed1b9A21F48E7777",
    "0xF5cBDCB063f65EA1CF5d5cDcfc81bF283Cb37777",
    "0x6A93a2c67955b4eA210333514eC9103C6bC67777",
    "0x31BbbB9205d6F354833B80cdCd788182b7037777",
    "0xF68287D696e77fe377999900eb85071Be0e07777",
    "0x148a3a811979e5BF8366FC279B2d67742Fe17777",
    "0x39D691612Ef8B4B884b0aA058f41C93d6B527777",
];

pub const DEFAULT_ANCHOR_THREAD: &str = "662624d7-273b-48e2-8f0c-1da7a0b6b427";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub llm: LlmConfig,
    pub panel: PanelConfig,
    pub voting: VotingConfig,
    pub trading: TradingConfig,
    pub risk: RiskConfig,
    pub publishing: PublishingConfig,
    pub debate: DebateConfig,
    pub schedule: ScheduleConfig,
    pub storage: StorageConfig,
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_network")]
    pub network: Network,
    /// Overrides the per-network token data endpoint.
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_metrics_timeframe")]
    pub metrics_timeframe: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            api_url: None,
            api_key: None,
            metrics_timeframe: default_metrics_timeframe(),
        }
    }
}

impl NetworkConfig {
    pub fn api_url(&self) -> &str {
        match (&self.api_url, self.network) {
            (Some(url), _) if !url.trim().is_empty() => url.trim(),
            (_, Network::Mainnet) => MAINNET_API_URL,
            (_, Network::Testnet) => TESTNET_API_URL,
        }
    }
}

fn default_network() -> Network {
    Network::Testnet
}

fn default_metrics_timeframe() -> String {
    "1h".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_primary_model")]
    pub primary_model: String,
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
    #[serde(default)]
    pub openai_api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            primary_model: default_primary_model(),
            fallback_model: default_fallback_model(),
            timeout_ms: default_llm_timeout_ms(),
            max_tokens: default_max_tokens(),
            max_retries: default_llm_max_retries(),
            anthropic_api_key: None,
            openai_api_key: None,
        }
    }
}

fn default_primary_model() -> String {
    "claude-haiku-4-5-20251001".into()
}

fn default_fallback_model() -> String {
    "gpt-4o-mini".into()
}

fn default_llm_timeout_ms() -> u64 {
    30_000
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_llm_max_retries() -> u32 {
    2
}

#[derive(Debug, Clone, Deserialize)]
pub struct PanelConfig {
    /// Answer from per-persona fixtures instead of calling a model.
    #[serde(default)]
    pub offline: bool,
    /// Memoize generations in the store.
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            offline: false,
            cache_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VotingConfig {
    #[serde(default = "default_vote_threshold")]
    pub threshold: f64,
    #[serde(default = "default_min_yes_votes")]
    pub min_yes_votes: usize,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            threshold: default_vote_threshold(),
            min_yes_votes: default_min_yes_votes(),
        }
    }
}

fn default_vote_threshold() -> f64 {
    DEFAULT_VOTE_THRESHOLD
}

fn default_min_yes_votes() -> usize {
    DEFAULT_MIN_YES_VOTES
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    #[serde(default = "default_true")]
    pub dry_run: bool,
    /// Native amount spent per INVEST decision.
    #[serde(default = "default_buy_amount")]
    pub buy_amount: f64,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u32,
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    /// Signing relay. Without one, trading is dry-run only.
    #[serde(default)]
    pub relay_url: Option<String>,
    #[serde(default)]
    pub relay_token: Option<String>,
    /// Balance reported in dry-run mode when no relay is configured.
    #[serde(default = "default_paper_balance")]
    pub paper_balance: f64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            buy_amount: default_buy_amount(),
            slippage_bps: default_slippage_bps(),
            deadline_secs: default_deadline_secs(),
            relay_url: None,
            relay_token: None,
            paper_balance: default_paper_balance(),
        }
    }
}

fn default_buy_amount() -> f64 {
    0.1
}

fn default_slippage_bps() -> u32 {
    100
}

fn default_deadline_secs() -> u64 {
    300
}

fn default_paper_balance() -> f64 {
    10.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_take_profit")]
    pub take_profit_percent: f64,
    #[serde(default = "default_stop_loss")]
    pub stop_loss_percent: f64,
    /// Native balance that must remain after a buy.
    #[serde(default = "default_min_reserve")]
    pub min_reserve: f64,
    #[serde(default = "default_max_open_holdings")]
    pub max_open_holdings: usize,
    #[serde(default = "default_max_buys_per_hour")]
    pub max_buys_per_hour: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            take_profit_percent: default_take_profit(),
            stop_loss_percent: default_stop_loss(),
            min_reserve: default_min_reserve(),
            max_open_holdings: default_max_open_holdings(),
            max_buys_per_hour: default_max_buys_per_hour(),
        }
    }
}

fn default_take_profit() -> f64 {
    50.0
}

fn default_stop_loss() -> f64 {
    30.0
}

fn default_min_reserve() -> f64 {
    0.05
}

fn default_max_open_holdings() -> usize {
    10
}

fn default_max_buys_per_hour() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_board_url")]
    pub base_url: String,
    #[serde(default = "default_community")]
    pub community: String,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_thread_cooldown_secs")]
    pub thread_cooldown_secs: u64,
    #[serde(default = "default_reply_cooldown_secs")]
    pub reply_cooldown_secs: u64,
    /// Per-persona API keys, keyed by role name. Filled from the environment.
    #[serde(default)]
    pub api_keys: HashMap<String, String>,
}

impl Default for PublishingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_board_url(),
            community: default_community(),
            requests_per_minute: default_requests_per_minute(),
            thread_cooldown_secs: default_thread_cooldown_secs(),
            reply_cooldown_secs: default_reply_cooldown_secs(),
            api_keys: HashMap::new(),
        }
    }
}

fn default_board_url() -> String {
    publish_client::client::DEFAULT_BASE_URL.into()
}

fn default_community() -> String {
    "alphaswarm".into()
}

fn default_requests_per_minute() -> u32 {
    30
}

fn default_thread_cooldown_secs() -> u64 {
    publish_client::DEFAULT_THREAD_COOLDOWN.as_secs()
}

fn default_reply_cooldown_secs() -> u64 {
    publish_client::DEFAULT_REPLY_COOLDOWN.as_secs()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DebateConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Thread every persona replies on when a new thread cannot be opened.
    #[serde(default = "default_anchor_thread")]
    pub anchor_thread_id: String,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            anchor_thread_id: default_anchor_thread(),
        }
    }
}

fn default_anchor_thread() -> String {
    DEFAULT_ANCHOR_THREAD.into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_queue_interval")]
    pub queue_interval_secs: u64,
    #[serde(default = "default_crawl_interval")]
    pub crawl_interval_secs: u64,
    #[serde(default = "default_exit_interval")]
    pub exit_interval_secs: u64,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    /// Delay before the seed tokens are queued.
    #[serde(default = "default_seed_delay")]
    pub seed_delay_secs: u64,
    #[serde(default = "default_report_initial_delay")]
    pub report_initial_delay_secs: u64,
    /// Upper bound on waiting for in-flight jobs at shutdown.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            queue_interval_secs: default_queue_interval(),
            crawl_interval_secs: default_crawl_interval(),
            exit_interval_secs: default_exit_interval(),
            report_interval_secs: default_report_interval(),
            seed_delay_secs: default_seed_delay(),
            report_initial_delay_secs: default_report_initial_delay(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

fn default_queue_interval() -> u64 {
    60
}

fn default_crawl_interval() -> u64 {
    600
}

fn default_exit_interval() -> u64 {
    300
}

fn default_report_interval() -> u64 {
    7200
}

fn default_seed_delay() -> u64 {
    5
}

fn default_report_initial_delay() -> u64 {
    300
}

fn default_drain_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Audit log directory. Resolved from EVENTS_DIR or the repo root when unset.
    #[serde(default)]
    pub journal_dir: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            journal_dir: None,
        }
    }
}

fn default_database_path() -> String {
    "data/syndicate.db".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_seeds")]
    pub seeds: Vec<String>,
    /// Queue length cap. Ids pushed beyond it are dropped.
    #[serde(default = "default_max_queue")]
    pub max_queue: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            seeds: default_seeds(),
            max_queue: default_max_queue(),
        }
    }
}

fn default_seeds() -> Vec<String> {
    SEED_TOKENS.iter().map(|s| s.to_string()).collect()
}

fn default_max_queue() -> usize {
    500
}

fn default_true() -> bool {
    true
}

// ── Loading ──────────────────────────────────────────────────────────

fn parse_bool(raw: &str) -> bool {
    let lowered = raw.trim().to_ascii_lowercase();
    lowered != "0" && lowered != "false" && lowered != "no" && lowered != "off"
}

fn non_empty(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Environment variable holding the board key for `role`.
pub fn publish_key_var(role: Role) -> String {
    format!("PUBLISH_API_KEY_{}", role.label())
}

impl AppConfig {
    /// Reads `path` when it exists, otherwise starts from defaults, then
    /// applies `.env` and process environment overrides and validates.
    pub fn load(path: &Path) -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("No .env file loaded: {}", e);
        }

        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            tracing::info!("{} not found, using defaults", path.display());
            AppConfig::default()
        };

        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Environment wins over the file. `lookup` is `std::env::var` outside tests.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(raw) = lookup("NETWORK") {
            self.network.network = match raw.trim().to_ascii_lowercase().as_str() {
                "mainnet" => Network::Mainnet,
                "testnet" => Network::Testnet,
                other => bail!("NETWORK must be one of: mainnet, testnet (got {:?})", other),
            };
        }
        if let Some(key) = lookup("NADFUN_API_KEY").and_then(non_empty) {
            self.network.api_key = Some(key);
        }
        if let Some(key) = lookup("ANTHROPIC_API_KEY").and_then(non_empty) {
            self.llm.anthropic_api_key = Some(key);
        }
        if let Some(key) = lookup("OPENAI_API_KEY").and_then(non_empty) {
            self.llm.openai_api_key = Some(key);
        }
        if let Some(raw) = lookup("MOCK_LLM") {
            self.panel.offline = parse_bool(&raw);
        }
        if let Some(raw) = lookup("DRY_RUN") {
            self.trading.dry_run = parse_bool(&raw);
        }
        if let Some(url) = lookup("TRADING_RELAY_URL").and_then(non_empty) {
            self.trading.relay_url = Some(url);
        }
        if let Some(token) = lookup("TRADING_RELAY_TOKEN").and_then(non_empty) {
            self.trading.relay_token = Some(token);
        }
        if let Some(raw) = lookup("BUY_AMOUNT") {
            self.trading.buy_amount = raw
                .trim()
                .parse::<f64>()
                .map_err(|_| anyhow::anyhow!("BUY_AMOUNT must be a number > 0"))?;
        }
        for role in Role::ALL {
            if let Some(key) = lookup(&publish_key_var(role)).and_then(non_empty) {
                self.publishing.api_keys.insert(role.as_str().to_string(), key);
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let mut issues: Vec<String> = Vec::new();

        if self.network.metrics_timeframe.trim().is_empty() {
            issues.push("network.metrics_timeframe must not be empty".into());
        }
        if self.llm.timeout_ms == 0 {
            issues.push("llm.timeout_ms must be > 0".into());
        }
        if self.llm.max_tokens == 0 {
            issues.push("llm.max_tokens must be > 0".into());
        }

        if !(0.0..=10.0).contains(&self.voting.threshold) {
            issues.push("voting.threshold must be in [0,10]".into());
        }
        if self.voting.min_yes_votes > Role::ALL.len() {
            issues.push(format!(
                "voting.min_yes_votes must be <= {}",
                Role::ALL.len()
            ));
        }

        if !(self.trading.buy_amount > 0.0) {
            issues.push("trading.buy_amount must be > 0".into());
        }
        if self.trading.slippage_bps > 10_000 {
            issues.push("trading.slippage_bps must be <= 10000".into());
        }
        if self.trading.deadline_secs == 0 {
            issues.push("trading.deadline_secs must be > 0".into());
        }
        if !self.trading.dry_run && self.trading.relay_url.is_none() {
            issues.push("trading.relay_url (or TRADING_RELAY_URL) is required when dry_run=false".into());
        }

        if !(self.risk.take_profit_percent > 0.0) {
            issues.push("risk.take_profit_percent must be > 0".into());
        }
        if !(self.risk.stop_loss_percent > 0.0 && self.risk.stop_loss_percent <= 100.0) {
            issues.push("risk.stop_loss_percent must be in (0,100]".into());
        }
        if self.risk.min_reserve < 0.0 {
            issues.push("risk.min_reserve must be >= 0".into());
        }
        if self.risk.max_open_holdings == 0 {
            issues.push("risk.max_open_holdings must be > 0".into());
        }
        if self.risk.max_buys_per_hour == 0 {
            issues.push("risk.max_buys_per_hour must be > 0".into());
        }

        if self.publishing.requests_per_minute == 0 {
            issues.push("publishing.requests_per_minute must be > 0".into());
        }
        if self.publishing.community.trim().is_empty() {
            issues.push("publishing.community must not be empty".into());
        }
        if self.debate.enabled && self.debate.anchor_thread_id.trim().is_empty() {
            issues.push("debate.anchor_thread_id is required when debate is enabled".into());
        }

        let s = &self.schedule;
        for (name, value) in [
            ("schedule.queue_interval_secs", s.queue_interval_secs),
            ("schedule.crawl_interval_secs", s.crawl_interval_secs),
            ("schedule.exit_interval_secs", s.exit_interval_secs),
            ("schedule.report_interval_secs", s.report_interval_secs),
        ] {
            if value == 0 {
                issues.push(format!("{} must be > 0", name));
            }
        }

        if self.storage.database_path.trim().is_empty() {
            issues.push("storage.database_path must not be empty".into());
        }
        if self.discovery.max_queue == 0 {
            issues.push("discovery.max_queue must be > 0".into());
        }

        if issues.is_empty() {
            Ok(())
        } else {
            bail!("Invalid config:\n - {}", issues.join("\n - "))
        }
    }

    /// Whether a model provider key is available.
    pub fn has_llm_key(&self) -> bool {
        self.llm.anthropic_api_key.is_some() || self.llm.openai_api_key.is_some()
    }
}
