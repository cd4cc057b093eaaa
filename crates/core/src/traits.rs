use crate::models::*;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Signature for this request is not valid.
pub const INVALID_SIGNATURE: i32 = -1022;
/// Invalid symbol.
pub const INVALID_SYMBOL: i32 = -1121;
/// Order does not exist.
pub const NO_SUCH_ORDER: i32 = -2013;

/// Faults raised by a blocking REST client.
///
/// `Clone + PartialEq` so the very same fault can be handed to both an
/// operation handle and its callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("API error {code}: {message}")]
    Api { code: i32, message: String },
    #[error("Decode error: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn api(code: i32, message: impl Into<String>) -> Self {
        ApiError::Api {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_symbol() -> Self {
        Self::api(INVALID_SYMBOL, "Invalid symbol.")
    }

    pub fn invalid_signature() -> Self {
        Self::api(INVALID_SIGNATURE, "Signature for this request is not valid.")
    }

    /// Exchange error code, if the fault came from the exchange itself.
    pub fn code(&self) -> Option<i32> {
        match self {
            ApiError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Blocking REST Client Trait
// ---------------------------------------------------------------------------

/// A blocking exchange REST client.
///
/// Every method blocks the calling thread until the exchange answers.
/// Implementations must be safe to call from many threads at once.
///
/// Reduced-argument forms are provided methods that delegate to the
/// canonical form with [`DEFAULT_RECV_WINDOW`] and the current time.
pub trait RestClient: Send + Sync {
    // -- General -----------------------------------------------------------

    /// Test connectivity.
    fn ping(&self) -> Result<(), ApiError>;

    /// Server time in epoch milliseconds.
    fn server_time(&self) -> Result<i64, ApiError>;

    fn exchange_info(&self) -> Result<ExchangeInfo, ApiError>;

    /// All supported assets and whether they can be withdrawn.
    fn all_assets(&self) -> Result<Vec<Asset>, ApiError>;

    // -- Market data -------------------------------------------------------

    /// Order book of `symbol`, `limit` levels deep.
    fn order_book(&self, symbol: &str, limit: u16) -> Result<OrderBook, ApiError>;

    /// Recent trades. `limit` defaults to 500 on the exchange side.
    fn trades(&self, symbol: &str, limit: Option<u16>) -> Result<Vec<TradeHistoryItem>, ApiError>;

    /// Older trades, starting at trade id `from_id` when given.
    fn historical_trades(
        &self,
        symbol: &str,
        limit: Option<u16>,
        from_id: Option<u64>,
    ) -> Result<Vec<TradeHistoryItem>, ApiError>;

    /// Compressed, aggregate trades.
    ///
    /// If both `start_time` and `end_time` are sent, `limit` should not be,
    /// and the window must be shorter than 24 hours.
    fn agg_trades_with(
        &self,
        symbol: &str,
        from_id: Option<u64>,
        limit: Option<u16>,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Result<Vec<AggTrade>, ApiError>;

    /// Most recent aggregate trades for `symbol`.
    fn agg_trades(&self, symbol: &str) -> Result<Vec<AggTrade>, ApiError> {
        self.agg_trades_with(symbol, None, None, None, None)
    }

    fn candlestick_bars_with(
        &self,
        symbol: &str,
        interval: CandlestickInterval,
        limit: Option<u16>,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Result<Vec<Candlestick>, ApiError>;

    fn candlestick_bars(
        &self,
        symbol: &str,
        interval: CandlestickInterval,
    ) -> Result<Vec<Candlestick>, ApiError> {
        self.candlestick_bars_with(symbol, interval, None, None, None)
    }

    fn ticker_24hr(&self, symbol: &str) -> Result<TickerStatistics, ApiError>;

    fn all_tickers_24hr(&self) -> Result<Vec<TickerStatistics>, ApiError>;

    fn all_prices(&self) -> Result<Vec<TickerPrice>, ApiError>;

    fn price(&self, symbol: &str) -> Result<TickerPrice, ApiError>;

    /// Best price/qty on the order book for every symbol.
    fn book_tickers(&self) -> Result<Vec<BookTicker>, ApiError>;

    // -- Account -----------------------------------------------------------

    fn new_order(&self, order: &NewOrder) -> Result<NewOrderResponse, ApiError>;

    /// Validates a new order without sending it to the matching engine.
    fn new_order_test(&self, order: &NewOrder) -> Result<(), ApiError>;

    fn order_status(&self, request: &OrderStatusRequest) -> Result<Order, ApiError>;

    fn cancel_order(&self, request: &CancelOrderRequest) -> Result<CancelOrderResponse, ApiError>;

    fn open_orders(&self, request: &OrderRequest) -> Result<Vec<Order>, ApiError>;

    fn all_orders(&self, request: &AllOrdersRequest) -> Result<Vec<Order>, ApiError>;

    fn account_with(&self, recv_window: u64, timestamp: i64) -> Result<Account, ApiError>;

    fn account(&self) -> Result<Account, ApiError> {
        self.account_with(DEFAULT_RECV_WINDOW, now_millis())
    }

    /// Trades of this account for `symbol`.
    fn my_trades_with(
        &self,
        symbol: &str,
        limit: Option<u16>,
        from_id: Option<u64>,
        recv_window: u64,
        timestamp: i64,
    ) -> Result<Vec<Trade>, ApiError>;

    fn my_trades_limit(&self, symbol: &str, limit: u16) -> Result<Vec<Trade>, ApiError> {
        self.my_trades_with(symbol, Some(limit), None, DEFAULT_RECV_WINDOW, now_millis())
    }

    fn my_trades(&self, symbol: &str) -> Result<Vec<Trade>, ApiError> {
        self.my_trades_with(symbol, None, None, DEFAULT_RECV_WINDOW, now_millis())
    }

    /// Submit a withdraw request. `amount` is passed through as a decimal string.
    fn withdraw(
        &self,
        asset: &str,
        address: &str,
        amount: &str,
        name: Option<&str>,
        address_tag: Option<&str>,
    ) -> Result<WithdrawResult, ApiError>;

    fn deposit_history(&self, asset: &str) -> Result<DepositHistory, ApiError>;

    fn withdraw_history(&self, asset: &str) -> Result<WithdrawHistory, ApiError>;

    fn deposit_address(&self, asset: &str) -> Result<DepositAddress, ApiError>;

    // -- User data stream --------------------------------------------------

    fn start_user_data_stream(&self) -> Result<ListenKey, ApiError>;

    fn keep_alive_user_data_stream(&self, listen_key: &str) -> Result<(), ApiError>;

    fn close_user_data_stream(&self, listen_key: &str) -> Result<(), ApiError>;
}
