use crate::domain::fees::{calculate_fee, StakingInfo, HIRAM_PRICE_USD, HIRAM_SYMBOL};
use crate::domain::wallet::{
    FeeRecord, StakedAsset, TokenHolding, Transaction, TransactionKind, TransactionStatus,
    WalletSnapshot, WalletStatus,
};
use crate::ingest::AssetPrice;
use anyhow::{ensure, Context};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

const BASE58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const ADDRESS_LEN: usize = 44;
pub const PLATFORM_PROTOCOL: &str = "HiramAbiff";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Connection {
    address: String,
    wallet_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StakeReceipt {
    pub transaction: Transaction,
    pub new_staking_amount: f64,
    pub new_tier: u8,
    pub fee_discount: f64,
}

/// Single-user wallet session backed by fixed demo balances.
///
/// Holdings survive disconnects; only the connection is cleared.
#[derive(Debug, Clone)]
pub struct MockWallet {
    connection: Option<Connection>,
    tokens: Vec<TokenHolding>,
    staked: Vec<StakedAsset>,
    transactions: Vec<Transaction>,
    staked_hiram: f64,
    fee_history: Vec<FeeRecord>,
}

impl Default for MockWallet {
    fn default() -> Self {
        Self::seeded(Utc::now())
    }
}

impl MockWallet {
    pub fn seeded(now: DateTime<Utc>) -> Self {
        let tokens = seed_tokens();
        let staked = seed_staked(&tokens);
        let transactions = seed_transactions(&tokens, now);
        let staked_hiram = 15_000.0;
        let fee_history = seed_fee_history(staked_hiram, now);

        Self {
            connection: None,
            tokens,
            staked,
            transactions,
            staked_hiram,
            fee_history,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn status(&self) -> WalletStatus {
        WalletStatus {
            connected: self.connection.is_some(),
            address: self.connection.as_ref().map(|c| c.address.clone()),
            wallet_type: self.connection.as_ref().map(|c| c.wallet_type.clone()),
        }
    }

    pub fn connect(
        &mut self,
        wallet_type: &str,
        address: Option<String>,
    ) -> anyhow::Result<WalletStatus> {
        let wallet_type = wallet_type.trim();
        ensure!(!wallet_type.is_empty(), "wallet_type is required");

        let address = address
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .unwrap_or_else(generate_address);

        tracing::info!(wallet_type, %address, "connected mock wallet");
        self.connection = Some(Connection {
            address,
            wallet_type: wallet_type.to_string(),
        });
        Ok(self.status())
    }

    pub fn disconnect(&mut self) -> WalletStatus {
        if let Some(conn) = self.connection.take() {
            tracing::info!(address = %conn.address, "wallet disconnected");
        }
        self.status()
    }

    fn require_connection(&self) -> anyhow::Result<&Connection> {
        self.connection.as_ref().context("No wallet connected")
    }

    pub fn data(&self) -> anyhow::Result<WalletSnapshot> {
        let conn = self.require_connection()?;
        Ok(WalletSnapshot {
            address: conn.address.clone(),
            wallet_type: conn.wallet_type.clone(),
            tokens: self.tokens.clone(),
            staked: self.staked.clone(),
            transactions: self.transactions.clone(),
            staking: StakingInfo::for_amount(self.staked_hiram),
            fee_history: self.fee_history.clone(),
        })
    }

    pub fn staking_info(&self) -> anyhow::Result<StakingInfo> {
        self.require_connection()?;
        Ok(StakingInfo::for_amount(self.staked_hiram))
    }

    pub fn fee_history(&self) -> anyhow::Result<Vec<FeeRecord>> {
        self.require_connection()?;
        Ok(self.fee_history.clone())
    }

    /// Tickers of every held token and staked asset.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .tokens
            .iter()
            .map(|t| t.symbol.clone())
            .chain(self.staked.iter().map(|s| s.token.clone()))
            .collect();
        symbols.sort_unstable();
        symbols.dedup();
        symbols
    }

    /// Reprices holdings and staked assets from market quotes, matching tickers
    /// case-insensitively. HIRAM keeps its platform price. Returns how many
    /// token holdings changed price.
    pub fn apply_prices(&mut self, quotes: &[AssetPrice]) -> usize {
        let quote = |symbol: &str| {
            if symbol.eq_ignore_ascii_case(HIRAM_SYMBOL) {
                return None;
            }
            quotes
                .iter()
                .filter(|q| q.price_usd.is_finite() && q.price_usd > 0.0)
                .find(|q| q.symbol.eq_ignore_ascii_case(symbol))
        };

        let mut repriced = 0;
        for token in &mut self.tokens {
            if let Some(q) = quote(&token.symbol) {
                token.price_usd = q.price_usd;
                token.price_change_24h = q.price_change_24h;
                token.revalue();
                repriced += 1;
            }
        }
        for staked in &mut self.staked {
            if let Some(q) = quote(&staked.token) {
                staked.value_usd = staked.amount * q.price_usd;
            }
        }
        self.tokens.sort_by(|a, b| b.value_usd.total_cmp(&a.value_usd));
        if repriced > 0 {
            tracing::debug!(repriced, "revalued wallet holdings");
        }
        repriced
    }

    /// HIRAM currently staked with the platform, whether or not a wallet is connected.
    pub fn staked_hiram(&self) -> f64 {
        self.staked_hiram
    }

    pub fn stake_hiram(&mut self, amount: f64) -> anyhow::Result<StakeReceipt> {
        self.require_connection()?;
        ensure!(amount.is_finite() && amount > 0.0, "stake amount must be positive (got {amount})");

        let hiram = self
            .tokens
            .iter_mut()
            .find(|t| t.symbol == HIRAM_SYMBOL)
            .context("HIRAM token not found in wallet")?;
        ensure!(
            hiram.amount >= amount,
            "Insufficient HIRAM balance. Have {}, need {}",
            hiram.amount,
            amount
        );
        hiram.amount -= amount;
        hiram.revalue();
        self.staked_hiram += amount;

        let tx = self.push_transaction(
            TransactionKind::Stake,
            PLATFORM_PROTOCOL,
            Some(HIRAM_SYMBOL),
            None,
            amount,
            amount * HIRAM_PRICE_USD,
        );
        Ok(self.receipt(tx))
    }

    pub fn unstake_hiram(&mut self, amount: f64) -> anyhow::Result<StakeReceipt> {
        self.require_connection()?;
        ensure!(
            amount.is_finite() && amount > 0.0,
            "unstake amount must be positive (got {amount})"
        );
        ensure!(
            self.staked_hiram >= amount,
            "Insufficient staked HIRAM. Have {}, trying to unstake {}",
            self.staked_hiram,
            amount
        );

        if !self.tokens.iter().any(|t| t.symbol == HIRAM_SYMBOL) {
            self.tokens.push(hiram_holding(0.0));
        }
        if let Some(hiram) = self.tokens.iter_mut().find(|t| t.symbol == HIRAM_SYMBOL) {
            hiram.amount += amount;
            hiram.revalue();
        }
        self.staked_hiram -= amount;

        let tx = self.push_transaction(
            TransactionKind::Unstake,
            PLATFORM_PROTOCOL,
            None,
            Some(HIRAM_SYMBOL),
            amount,
            amount * HIRAM_PRICE_USD,
        );
        Ok(self.receipt(tx))
    }

    /// Logs a deposit or withdrawal made by the portfolio. Token balances move
    /// only when `asset` names a held token.
    pub fn record_transaction(
        &mut self,
        kind: TransactionKind,
        protocol: &str,
        asset: &str,
        amount: f64,
    ) -> anyhow::Result<Transaction> {
        self.require_connection()?;
        ensure!(amount.is_finite() && amount >= 0.0, "transaction amount must be non-negative");

        let mut value_usd = amount;
        if let Some(token) = self.tokens.iter_mut().find(|t| t.symbol == asset) {
            match kind {
                TransactionKind::Deposit => {
                    ensure!(
                        token.amount >= amount,
                        "Insufficient {asset} balance. Have {}, need {}",
                        token.amount,
                        amount
                    );
                    token.amount -= amount;
                }
                TransactionKind::Withdraw => token.amount += amount,
                _ => {}
            }
            token.revalue();
            value_usd = amount * token.price_usd;
        }

        let (token_in, token_out) = match kind {
            TransactionKind::Withdraw | TransactionKind::Unstake | TransactionKind::Receive => {
                (None, Some(asset))
            }
            _ => (Some(asset), None),
        };
        Ok(self.push_transaction(kind, protocol, token_in, token_out, amount, value_usd))
    }

    fn push_transaction(
        &mut self,
        kind: TransactionKind,
        protocol: &str,
        token_in: Option<&str>,
        token_out: Option<&str>,
        amount: f64,
        value_usd: f64,
    ) -> Transaction {
        let tx = Transaction {
            kind,
            protocol: protocol.to_string(),
            token_in: token_in.map(str::to_string),
            token_out: token_out.map(str::to_string),
            amount,
            value_usd,
            timestamp: Utc::now(),
            tx_hash: mock_tx_hash(),
            status: TransactionStatus::Confirmed,
        };
        tracing::info!(
            kind = ?tx.kind,
            protocol,
            amount,
            tx_hash = %tx.tx_hash,
            "recorded mock transaction"
        );
        self.transactions.insert(0, tx.clone());
        tx
    }

    fn receipt(&self, transaction: Transaction) -> StakeReceipt {
        let info = StakingInfo::for_amount(self.staked_hiram);
        StakeReceipt {
            transaction,
            new_staking_amount: info.amount,
            new_tier: info.tier,
            fee_discount: info.fee_discount,
        }
    }
}

/// 44 characters drawn from the base58 alphabet, shaped like a Solana address.
pub fn generate_address() -> String {
    std::iter::repeat_with(|| *uuid::Uuid::new_v4().as_bytes())
        .flatten()
        .take(ADDRESS_LEN)
        .map(|b| BASE58_ALPHABET[usize::from(b) % BASE58_ALPHABET.len()] as char)
        .collect()
}

pub fn mock_tx_hash() -> String {
    format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple())
}

fn holding(
    symbol: &str,
    amount: f64,
    price_usd: f64,
    change: f64,
    yield_pct: Option<f64>,
) -> TokenHolding {
    TokenHolding {
        symbol: symbol.to_string(),
        name: format!("{symbol} Token"),
        amount,
        price_usd,
        value_usd: amount * price_usd,
        price_change_24h: change,
        yield_pct,
    }
}

fn hiram_holding(amount: f64) -> TokenHolding {
    holding(HIRAM_SYMBOL, amount, HIRAM_PRICE_USD, 4.2, Some(5.0))
}

fn seed_tokens() -> Vec<TokenHolding> {
    let mut tokens = vec![
        holding("SOL", 12.5, 150.25, 3.4, Some(6.5)),
        holding("USDC", 2_500.0, 1.0, 0.0, None),
        holding("ETH", 1.2, 3_500.75, -1.8, None),
        holding("BTC", 0.05, 64_250.0, 2.1, None),
        hiram_holding(100_000.0),
        holding("RAY", 400.0, 0.75, 7.9, Some(12.5)),
        holding("BONK", 20_000_000.0, 0.000025, 11.3, None),
        holding("JTO", 150.0, 2.15, -4.6, None),
    ];
    tokens.sort_by(|a, b| b.value_usd.total_cmp(&a.value_usd));
    tokens
}

fn seed_staked(tokens: &[TokenHolding]) -> Vec<StakedAsset> {
    let price = |symbol: &str| {
        tokens
            .iter()
            .find(|t| t.symbol == symbol)
            .map(|t| t.price_usd)
            .unwrap_or(0.0)
    };
    [
        ("Marinade", "SOL", 4.0, 5.7),
        ("Lido", "ETH", 0.5, 5.5),
        ("Jito", "SOL", 2.5, 6.2),
        ("Raydium", "RAY", 150.0, 12.5),
    ]
    .into_iter()
    .map(|(protocol, token, amount, apy)| StakedAsset {
        protocol: protocol.to_string(),
        token: token.to_string(),
        amount,
        value_usd: amount * price(token),
        apy,
    })
    .collect()
}

fn seed_transactions(tokens: &[TokenHolding], now: DateTime<Utc>) -> Vec<Transaction> {
    let price = |symbol: &str| {
        tokens
            .iter()
            .find(|t| t.symbol == symbol)
            .map(|t| t.price_usd)
            .unwrap_or(0.0)
    };
    let rows: [(TransactionKind, &str, &str, Option<&str>, f64, i64, TransactionStatus); 6] = [
        (TransactionKind::Swap, "Jupiter", "USDC", Some("SOL"), 300.0, 1, TransactionStatus::Pending),
        (TransactionKind::Stake, "Jito", "SOL", None, 2.5, 3, TransactionStatus::Confirmed),
        (TransactionKind::Deposit, "Raydium", "RAY", None, 150.0, 6, TransactionStatus::Confirmed),
        (TransactionKind::Stake, "Marinade", "SOL", None, 4.0, 11, TransactionStatus::Confirmed),
        (TransactionKind::Receive, "Phoenix", "JTO", None, 40.0, 19, TransactionStatus::Confirmed),
        (TransactionKind::Swap, "Orca", "ETH", Some("USDC"), 0.2, 27, TransactionStatus::Confirmed),
    ];
    rows.into_iter()
        .map(|(kind, protocol, token_in, token_out, amount, days_ago, status)| Transaction {
            kind,
            protocol: protocol.to_string(),
            token_in: Some(token_in.to_string()),
            token_out: token_out.map(str::to_string),
            amount,
            value_usd: amount * price(token_in),
            timestamp: now - Duration::days(days_ago),
            tx_hash: mock_tx_hash(),
            status,
        })
        .collect()
}

fn seed_fee_history(staked_hiram: f64, now: DateTime<Utc>) -> Vec<FeeRecord> {
    [
        ("Raydium SOL-USDC LP", 412.40, 2),
        ("Marinade Staked SOL", 88.15, 9),
        ("Orca ORCA-SOL LP", 260.00, 17),
        ("Solend USDC Lending", 131.75, 33),
        ("Jupiter Swap Strategy", 57.30, 48),
    ]
    .into_iter()
    .filter_map(|(strategy_name, profit, days_ago)| {
        let fee = calculate_fee(profit, staked_hiram).ok()?;
        Some(FeeRecord {
            strategy_name: strategy_name.to_string(),
            profit_amount: profit,
            fee_rate: fee.effective_fee_percent,
            fee_amount: (fee.fee_amount * 100.0).round() / 100.0,
            discount: fee.discount_percent,
            timestamp: now - Duration::days(days_ago),
        })
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> MockWallet {
        let mut wallet = MockWallet::default();
        wallet.connect("phantom", None).unwrap();
        wallet
    }

    #[test]
    fn generated_address_uses_base58_alphabet() {
        let addr = generate_address();
        assert_eq!(addr.len(), ADDRESS_LEN);
        assert!(addr.bytes().all(|b| BASE58_ALPHABET.contains(&b)));
        assert_eq!(mock_tx_hash().len(), 64);
    }

    #[test]
    fn disconnect_clears_connection() {
        let mut wallet = MockWallet::default();
        let status = wallet.connect("solflare", Some("Abc123".to_string())).unwrap();
        assert!(status.connected);
        assert_eq!(status.address.as_deref(), Some("Abc123"));

        let status = wallet.disconnect();
        assert!(!status.connected);
        assert_eq!(status.address, None);
        assert_eq!(status.wallet_type, None);
        assert!(wallet.data().is_err());
    }

    #[test]
    fn data_requires_connection() {
        let wallet = MockWallet::default();
        let err = wallet.data().unwrap_err();
        assert_eq!(err.to_string(), "No wallet connected");
        assert!(wallet.staking_info().is_err());
        assert!(wallet.fee_history().is_err());
    }

    #[test]
    fn staking_moves_balance_and_recomputes_tier() {
        let mut wallet = connected();
        assert_eq!(wallet.staking_info().unwrap().tier, 2);

        let receipt = wallet.stake_hiram(85_000.0).unwrap();
        assert_eq!(receipt.new_staking_amount, 100_000.0);
        assert_eq!(receipt.new_tier, 3);
        assert_eq!(receipt.fee_discount, 20.0);
        assert_eq!(receipt.transaction.kind, TransactionKind::Stake);

        let snapshot = wallet.data().unwrap();
        let hiram = snapshot.tokens.iter().find(|t| t.symbol == HIRAM_SYMBOL).unwrap();
        assert_eq!(hiram.amount, 15_000.0);
        assert_eq!(hiram.value_usd, 15_000.0 * HIRAM_PRICE_USD);
        assert_eq!(snapshot.transactions[0].tx_hash, receipt.transaction.tx_hash);
    }

    #[test]
    fn rejects_overdrawn_and_non_positive_amounts() {
        let mut wallet = connected();
        assert!(wallet.stake_hiram(0.0).is_err());
        assert!(wallet.stake_hiram(1_000_000.0).is_err());
        assert!(wallet.unstake_hiram(15_000.01).is_err());
        assert_eq!(wallet.staked_hiram(), 15_000.0);
    }

    #[test]
    fn unstaking_returns_tokens_and_drops_tier() {
        let mut wallet = connected();
        let receipt = wallet.unstake_hiram(14_500.0).unwrap();
        assert_eq!(receipt.new_tier, 0);
        assert_eq!(receipt.transaction.token_out.as_deref(), Some(HIRAM_SYMBOL));
        let info = wallet.staking_info().unwrap();
        assert_eq!(info.amount, 500.0);
        assert_eq!(info.next_tier.map(|t| t.amount), Some(1_000.0));
    }

    #[test]
    fn deposit_of_held_token_reduces_balance() {
        let mut wallet = connected();
        let tx = wallet
            .record_transaction(TransactionKind::Deposit, "Kamino", "USDC", 500.0)
            .unwrap();
        assert_eq!(tx.token_in.as_deref(), Some("USDC"));
        let usdc = wallet
            .data()
            .unwrap()
            .tokens
            .into_iter()
            .find(|t| t.symbol == "USDC")
            .unwrap();
        assert_eq!(usdc.amount, 2_000.0);
        assert_eq!(usdc.value_usd, 2_000.0);
    }

    #[test]
    fn summary_sums_staked_yield() {
        let snapshot = connected().data().unwrap();
        let summary = snapshot.summary();
        let protocol_value: f64 = snapshot.staked.iter().map(|s| s.value_usd).sum();
        let protocol_yield: f64 = snapshot.staked.iter().map(|s| s.value_usd * s.apy / 100.0).sum();

        // 15,000 HIRAM at $1.25 sits in tier 2, earning 3%.
        assert_eq!(snapshot.staking.apy, 3.0);
        assert!((summary.staked_usd - (protocol_value + 18_750.0)).abs() < 1e-9);
        assert!((summary.annual_yield_usd - (protocol_yield + 562.5)).abs() < 1e-9);
        assert!(summary.balance_usd > summary.staked_usd);
    }

    #[test]
    fn staking_more_hiram_moves_value_into_the_staked_total() {
        let mut wallet = connected();
        let before = wallet.data().unwrap().summary();
        wallet.stake_hiram(1_000.0).unwrap();
        let after = wallet.data().unwrap().summary();

        assert!((after.staked_usd - before.staked_usd - 1_250.0).abs() < 1e-9);
        assert!((before.balance_usd - after.balance_usd - 1_250.0).abs() < 1e-9);
    }

    #[test]
    fn deposit_larger_than_balance_is_rejected() {
        let mut wallet = connected();
        let err = wallet
            .record_transaction(TransactionKind::Deposit, "Raydium", "USDC", 2_600.0)
            .unwrap_err();
        assert!(err.to_string().starts_with("Insufficient USDC balance"), "{err}");

        let snapshot = wallet.data().unwrap();
        let usdc = snapshot.tokens.iter().find(|t| t.symbol == "USDC").unwrap();
        assert_eq!(usdc.amount, 2_500.0);
        assert_eq!(snapshot.transactions.len(), 6);
    }

    #[test]
    fn quotes_reprice_tokens_and_stakes_but_not_hiram() {
        let mut wallet = connected();
        let quotes = [
            AssetPrice {
                symbol: "sol".to_string(),
                name: "Solana".to_string(),
                price_usd: 100.0,
                price_change_24h: -3.0,
            },
            AssetPrice {
                symbol: "HIRAM".to_string(),
                name: "HIRAM".to_string(),
                price_usd: 9.0,
                price_change_24h: 0.0,
            },
        ];

        assert_eq!(wallet.apply_prices(&quotes), 1);
        let snapshot = wallet.data().unwrap();
        let sol = snapshot.tokens.iter().find(|t| t.symbol == "SOL").unwrap();
        assert_eq!(sol.value_usd, 1_250.0);
        assert_eq!(sol.price_change_24h, -3.0);
        let marinade = snapshot.staked.iter().find(|s| s.protocol == "Marinade").unwrap();
        assert_eq!(marinade.value_usd, 400.0);
        let hiram = snapshot.tokens.iter().find(|t| t.symbol == HIRAM_SYMBOL).unwrap();
        assert_eq!(hiram.price_usd, HIRAM_PRICE_USD);
    }
}
