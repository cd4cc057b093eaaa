use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Default `recvWindow` in milliseconds for signed requests.
pub const DEFAULT_RECV_WINDOW: u64 = 60_000;

/// Milliseconds since the Unix epoch, the timestamp unit of every signed request.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// General
// ---------------------------------------------------------------------------

/// Server clock, in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTime {
    pub server_time: i64,
}

/// A rate limit advertised by the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    pub rate_limit_type: String,
    pub interval: String,
    pub limit: u32,
}

/// Trading rules for a single symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub base_asset_precision: u32,
    pub quote_asset: String,
    pub quote_precision: u32,
    pub order_types: Vec<OrderType>,
    pub iceberg_allowed: bool,
}

/// Current exchange trading rules and symbol information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeInfo {
    pub timezone: String,
    pub server_time: i64,
    pub rate_limits: Vec<RateLimit>,
    pub symbols: Vec<SymbolInfo>,
}

impl ExchangeInfo {
    pub fn symbol_info(&self, symbol: &str) -> Option<&SymbolInfo> {
        self.symbols.iter().find(|s| s.symbol == symbol)
    }
}

/// A supported asset and its withdrawal terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub asset_code: String,
    pub asset_name: String,
    pub transaction_fee: Decimal,
    pub min_withdraw_amount: Decimal,
    pub enable_withdraw: bool,
    pub confirm_times: u32,
}

// ---------------------------------------------------------------------------
// Market Data
// ---------------------------------------------------------------------------

/// One price level of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookEntry {
    pub price: Decimal,
    pub qty: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBook {
    pub last_update_id: u64,
    pub bids: Vec<OrderBookEntry>,
    pub asks: Vec<OrderBookEntry>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<&OrderBookEntry> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&OrderBookEntry> {
        self.asks.first()
    }
}

/// A public trade (recent or historical).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeHistoryItem {
    pub id: u64,
    pub price: Decimal,
    pub qty: Decimal,
    pub time: i64,
    pub is_buyer_maker: bool,
    pub is_best_match: bool,
}

/// Trades that filled at the same time, from the same order, at the same price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggTrade {
    pub aggregated_trade_id: u64,
    pub price: Decimal,
    pub quantity: Decimal,
    pub first_breakdown_trade_id: u64,
    pub last_breakdown_trade_id: u64,
    pub trade_time: i64,
    pub is_buyer_maker: bool,
}

/// Kline/candlestick interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandlestickInterval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "3m")]
    ThreeMinutes,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    HalfHourly,
    #[serde(rename = "1h")]
    Hourly,
    #[serde(rename = "2h")]
    TwoHourly,
    #[serde(rename = "4h")]
    FourHourly,
    #[serde(rename = "6h")]
    SixHourly,
    #[serde(rename = "8h")]
    EightHourly,
    #[serde(rename = "12h")]
    TwelveHourly,
    #[serde(rename = "1d")]
    Daily,
    #[serde(rename = "3d")]
    ThreeDaily,
    #[serde(rename = "1w")]
    Weekly,
    #[serde(rename = "1M")]
    Monthly,
}

impl CandlestickInterval {
    /// The interval code as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            CandlestickInterval::OneMinute => "1m",
            CandlestickInterval::ThreeMinutes => "3m",
            CandlestickInterval::FiveMinutes => "5m",
            CandlestickInterval::FifteenMinutes => "15m",
            CandlestickInterval::HalfHourly => "30m",
            CandlestickInterval::Hourly => "1h",
            CandlestickInterval::TwoHourly => "2h",
            CandlestickInterval::FourHourly => "4h",
            CandlestickInterval::SixHourly => "6h",
            CandlestickInterval::EightHourly => "8h",
            CandlestickInterval::TwelveHourly => "12h",
            CandlestickInterval::Daily => "1d",
            CandlestickInterval::ThreeDaily => "3d",
            CandlestickInterval::Weekly => "1w",
            CandlestickInterval::Monthly => "1M",
        }
    }
}

/// A single kline bar, uniquely identified by its open time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candlestick {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
    pub quote_asset_volume: Decimal,
    pub number_of_trades: u64,
    pub taker_buy_base_asset_volume: Decimal,
    pub taker_buy_quote_asset_volume: Decimal,
}

/// 24 hour rolling price change statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerStatistics {
    pub symbol: String,
    pub price_change: Decimal,
    pub price_change_percent: Decimal,
    pub weighted_avg_price: Decimal,
    pub prev_close_price: Decimal,
    pub last_price: Decimal,
    pub bid_price: Decimal,
    pub ask_price: Decimal,
    pub open_price: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub volume: Decimal,
    pub open_time: i64,
    pub close_time: i64,
    pub first_id: u64,
    pub last_id: u64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    pub price: Decimal,
}

/// Best price/qty on the order book for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookTicker {
    pub symbol: String,
    pub bid_price: Decimal,
    pub bid_qty: Decimal,
    pub ask_price: Decimal,
    pub ask_qty: Decimal,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
    StopLoss,
    StopLossLimit,
    TakeProfit,
    TakeProfitLimit,
    LimitMaker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// Good till cancelled.
    Gtc,
    /// Immediate or cancel.
    Ioc,
    /// Fill or kill.
    Fok,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    PendingCancel,
    Rejected,
    Expired,
}

/// A new order to be placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub time_in_force: Option<TimeInForce>,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub new_client_order_id: Option<String>,
    pub stop_price: Option<Decimal>,
    pub iceberg_qty: Option<Decimal>,
    pub recv_window: u64,
    pub timestamp: i64,
}

impl NewOrder {
    fn new(
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        time_in_force: Option<TimeInForce>,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type,
            time_in_force,
            quantity,
            price,
            new_client_order_id: None,
            stop_price: None,
            iceberg_qty: None,
            recv_window: DEFAULT_RECV_WINDOW,
            timestamp: now_millis(),
        }
    }

    /// Market buy of `quantity`.
    pub fn market_buy(symbol: &str, quantity: Decimal) -> Self {
        Self::new(symbol, OrderSide::Buy, OrderType::Market, None, quantity, None)
    }

    /// Market sell of `quantity`.
    pub fn market_sell(symbol: &str, quantity: Decimal) -> Self {
        Self::new(symbol, OrderSide::Sell, OrderType::Market, None, quantity, None)
    }

    /// Limit buy of `quantity` at `price`.
    pub fn limit_buy(symbol: &str, time_in_force: TimeInForce, quantity: Decimal, price: Decimal) -> Self {
        Self::new(
            symbol,
            OrderSide::Buy,
            OrderType::Limit,
            Some(time_in_force),
            quantity,
            Some(price),
        )
    }

    /// Limit sell of `quantity` at `price`.
    pub fn limit_sell(symbol: &str, time_in_force: TimeInForce, quantity: Decimal, price: Decimal) -> Self {
        Self::new(
            symbol,
            OrderSide::Sell,
            OrderType::Limit,
            Some(time_in_force),
            quantity,
            Some(price),
        )
    }

    pub fn with_client_order_id(mut self, id: impl Into<String>) -> Self {
        self.new_client_order_id = Some(id.into());
        self
    }

    pub fn with_stop_price(mut self, stop_price: Decimal) -> Self {
        self.stop_price = Some(stop_price);
        self
    }

    pub fn with_iceberg_qty(mut self, iceberg_qty: Decimal) -> Self {
        self.iceberg_qty = Some(iceberg_qty);
        self
    }
}

/// Acknowledgement returned after placing an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrderResponse {
    pub symbol: String,
    pub order_id: u64,
    pub client_order_id: String,
    pub transact_time: i64,
}

/// An order as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub symbol: String,
    pub order_id: u64,
    pub client_order_id: String,
    pub price: Decimal,
    pub orig_qty: Decimal,
    pub executed_qty: Decimal,
    pub status: OrderStatus,
    pub time_in_force: Option<TimeInForce>,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub side: OrderSide,
    pub stop_price: Option<Decimal>,
    pub iceberg_qty: Option<Decimal>,
    pub time: i64,
}

impl Order {
    pub fn is_working(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::New | OrderStatus::PartiallyFilled | OrderStatus::PendingCancel
        )
    }
}

/// Open orders for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub symbol: String,
    pub recv_window: u64,
    pub timestamp: i64,
}

impl OrderRequest {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            recv_window: DEFAULT_RECV_WINDOW,
            timestamp: now_millis(),
        }
    }
}

/// Status lookup by exchange order id or by original client order id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusRequest {
    pub symbol: String,
    pub order_id: Option<u64>,
    pub orig_client_order_id: Option<String>,
    pub recv_window: u64,
    pub timestamp: i64,
}

impl OrderStatusRequest {
    pub fn by_order_id(symbol: &str, order_id: u64) -> Self {
        Self {
            symbol: symbol.to_string(),
            order_id: Some(order_id),
            orig_client_order_id: None,
            recv_window: DEFAULT_RECV_WINDOW,
            timestamp: now_millis(),
        }
    }

    pub fn by_client_order_id(symbol: &str, orig_client_order_id: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            order_id: None,
            orig_client_order_id: Some(orig_client_order_id.to_string()),
            recv_window: DEFAULT_RECV_WINDOW,
            timestamp: now_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderRequest {
    pub symbol: String,
    pub order_id: Option<u64>,
    pub orig_client_order_id: Option<String>,
    /// Client id assigned to the cancel itself.
    pub new_client_order_id: Option<String>,
    pub recv_window: u64,
    pub timestamp: i64,
}

impl CancelOrderRequest {
    pub fn by_order_id(symbol: &str, order_id: u64) -> Self {
        Self {
            symbol: symbol.to_string(),
            order_id: Some(order_id),
            orig_client_order_id: None,
            new_client_order_id: None,
            recv_window: DEFAULT_RECV_WINDOW,
            timestamp: now_millis(),
        }
    }

    pub fn by_client_order_id(symbol: &str, orig_client_order_id: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            order_id: None,
            orig_client_order_id: Some(orig_client_order_id.to_string()),
            new_client_order_id: None,
            recv_window: DEFAULT_RECV_WINDOW,
            timestamp: now_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderResponse {
    pub symbol: String,
    pub orig_client_order_id: String,
    pub order_id: u64,
    pub client_order_id: String,
}

/// All orders (active, cancelled, filled) for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllOrdersRequest {
    pub symbol: String,
    /// When set, only orders with an id >= this are returned.
    pub order_id: Option<u64>,
    pub limit: Option<u16>,
    pub recv_window: u64,
    pub timestamp: i64,
}

impl AllOrdersRequest {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            order_id: None,
            limit: None,
            recv_window: DEFAULT_RECV_WINDOW,
            timestamp: now_millis(),
        }
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

/// Account snapshot: commissions, permissions and balances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub maker_commission: u32,
    pub taker_commission: u32,
    pub buyer_commission: u32,
    pub seller_commission: u32,
    pub can_trade: bool,
    pub can_withdraw: bool,
    pub can_deposit: bool,
    pub update_time: i64,
    pub balances: Vec<AssetBalance>,
}

impl Account {
    /// Balance for `asset`, or a zero balance if the account holds none.
    pub fn asset_balance(&self, asset: &str) -> AssetBalance {
        self.balances
            .iter()
            .find(|b| b.asset == asset)
            .cloned()
            .unwrap_or_else(|| AssetBalance {
                asset: asset.to_string(),
                free: Decimal::ZERO,
                locked: Decimal::ZERO,
            })
    }
}

/// A trade executed by this account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: u64,
    pub symbol: String,
    pub order_id: u64,
    pub price: Decimal,
    pub qty: Decimal,
    pub commission: Decimal,
    pub commission_asset: String,
    pub time: i64,
    pub is_buyer: bool,
    pub is_maker: bool,
    pub is_best_match: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawResult {
    pub msg: String,
    pub success: bool,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deposit {
    pub amount: Decimal,
    pub asset: String,
    pub insert_time: i64,
    pub tx_id: String,
    pub status: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositHistory {
    pub deposit_list: Vec<Deposit>,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdraw {
    pub id: String,
    pub amount: Decimal,
    pub address: String,
    pub asset: String,
    pub apply_time: i64,
    pub tx_id: Option<String>,
    pub status: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawHistory {
    pub withdraw_list: Vec<Withdraw>,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositAddress {
    pub address: String,
    pub success: bool,
    pub address_tag: Option<String>,
    pub asset: String,
}

// ---------------------------------------------------------------------------
// User Data Stream
// ---------------------------------------------------------------------------

/// Key identifying a user data stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenKey {
    pub listen_key: String,
}
