use execbridge_core::*;
use execbridge_executor::{Bridge, BridgeError, Callback, OperationHandle};
use std::sync::Arc;

/// Handle returned by every [`AsyncRestClient`] operation.
pub type ApiHandle<T> = OperationHandle<T, ApiError>;

/// Callback accepted by every [`AsyncRestClient`] operation.
pub type ApiCallback<T> = Callback<T, ApiError>;

pub type ApiResult<T> = Result<ApiHandle<T>, BridgeError>;

/// Non-blocking exchange client.
///
/// Each operation binds its arguments into a closure over the shared
/// blocking client and runs it through the [`Bridge`]: the call executes on
/// the request pool, the optional callback fires on the response pool, and
/// the returned handle settles with the client's own result or `ApiError`.
#[derive(Clone)]
pub struct AsyncRestClient {
    client: Arc<dyn RestClient>,
    bridge: Bridge,
}

impl AsyncRestClient {
    pub fn new(client: Arc<dyn RestClient>, bridge: Bridge) -> Self {
        Self { client, bridge }
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    fn call<T, F>(&self, operation: &'static str, callback: Option<ApiCallback<T>>, f: F) -> ApiResult<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&dyn RestClient) -> Result<T, ApiError> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        self.bridge
            .invoke(operation, move || f(client.as_ref()), callback)
    }

    // -----------------------------------------------------------------------
    // General
    // -----------------------------------------------------------------------

    /// Test connectivity. Settles with `()`.
    pub fn ping(&self, callback: Option<ApiCallback<()>>) -> ApiResult<()> {
        self.call("ping", callback, |c| c.ping())
    }

    pub fn server_time(&self, callback: Option<ApiCallback<ServerTime>>) -> ApiResult<ServerTime> {
        self.call("server_time", callback, |c| {
            c.server_time().map(|server_time| ServerTime { server_time })
        })
    }

    pub fn exchange_info(&self, callback: Option<ApiCallback<ExchangeInfo>>) -> ApiResult<ExchangeInfo> {
        self.call("exchange_info", callback, |c| c.exchange_info())
    }

    pub fn all_assets(&self, callback: Option<ApiCallback<Vec<Asset>>>) -> ApiResult<Vec<Asset>> {
        self.call("all_assets", callback, |c| c.all_assets())
    }

    // -----------------------------------------------------------------------
    // Market data
    // -----------------------------------------------------------------------

    pub fn order_book(
        &self,
        symbol: &str,
        limit: u16,
        callback: Option<ApiCallback<OrderBook>>,
    ) -> ApiResult<OrderBook> {
        let symbol = symbol.to_string();
        self.call("order_book", callback, move |c| c.order_book(&symbol, limit))
    }

    pub fn trades(
        &self,
        symbol: &str,
        limit: Option<u16>,
        callback: Option<ApiCallback<Vec<TradeHistoryItem>>>,
    ) -> ApiResult<Vec<TradeHistoryItem>> {
        let symbol = symbol.to_string();
        self.call("trades", callback, move |c| c.trades(&symbol, limit))
    }

    pub fn historical_trades(
        &self,
        symbol: &str,
        limit: Option<u16>,
        from_id: Option<u64>,
        callback: Option<ApiCallback<Vec<TradeHistoryItem>>>,
    ) -> ApiResult<Vec<TradeHistoryItem>> {
        let symbol = symbol.to_string();
        self.call("historical_trades", callback, move |c| {
            c.historical_trades(&symbol, limit, from_id)
        })
    }

    pub fn agg_trades_with(
        &self,
        symbol: &str,
        from_id: Option<u64>,
        limit: Option<u16>,
        start_time: Option<i64>,
        end_time: Option<i64>,
        callback: Option<ApiCallback<Vec<AggTrade>>>,
    ) -> ApiResult<Vec<AggTrade>> {
        let symbol = symbol.to_string();
        self.call("agg_trades", callback, move |c| {
            c.agg_trades_with(&symbol, from_id, limit, start_time, end_time)
        })
    }

    /// Most recent aggregate trades for `symbol`.
    pub fn agg_trades(
        &self,
        symbol: &str,
        callback: Option<ApiCallback<Vec<AggTrade>>>,
    ) -> ApiResult<Vec<AggTrade>> {
        let symbol = symbol.to_string();
        self.call("agg_trades", callback, move |c| c.agg_trades(&symbol))
    }

    pub fn candlestick_bars_with(
        &self,
        symbol: &str,
        interval: CandlestickInterval,
        limit: Option<u16>,
        start_time: Option<i64>,
        end_time: Option<i64>,
        callback: Option<ApiCallback<Vec<Candlestick>>>,
    ) -> ApiResult<Vec<Candlestick>> {
        let symbol = symbol.to_string();
        self.call("candlestick_bars", callback, move |c| {
            c.candlestick_bars_with(&symbol, interval, limit, start_time, end_time)
        })
    }

    pub fn candlestick_bars(
        &self,
        symbol: &str,
        interval: CandlestickInterval,
        callback: Option<ApiCallback<Vec<Candlestick>>>,
    ) -> ApiResult<Vec<Candlestick>> {
        let symbol = symbol.to_string();
        self.call("candlestick_bars", callback, move |c| {
            c.candlestick_bars(&symbol, interval)
        })
    }

    pub fn ticker_24hr(
        &self,
        symbol: &str,
        callback: Option<ApiCallback<TickerStatistics>>,
    ) -> ApiResult<TickerStatistics> {
        let symbol = symbol.to_string();
        self.call("ticker_24hr", callback, move |c| c.ticker_24hr(&symbol))
    }

    pub fn all_tickers_24hr(
        &self,
        callback: Option<ApiCallback<Vec<TickerStatistics>>>,
    ) -> ApiResult<Vec<TickerStatistics>> {
        self.call("all_tickers_24hr", callback, |c| c.all_tickers_24hr())
    }

    pub fn all_prices(&self, callback: Option<ApiCallback<Vec<TickerPrice>>>) -> ApiResult<Vec<TickerPrice>> {
        self.call("all_prices", callback, |c| c.all_prices())
    }

    pub fn price(&self, symbol: &str, callback: Option<ApiCallback<TickerPrice>>) -> ApiResult<TickerPrice> {
        let symbol = symbol.to_string();
        self.call("price", callback, move |c| c.price(&symbol))
    }

    pub fn book_tickers(&self, callback: Option<ApiCallback<Vec<BookTicker>>>) -> ApiResult<Vec<BookTicker>> {
        self.call("book_tickers", callback, |c| c.book_tickers())
    }

    // -----------------------------------------------------------------------
    // Account
    // -----------------------------------------------------------------------

    pub fn new_order(
        &self,
        order: NewOrder,
        callback: Option<ApiCallback<NewOrderResponse>>,
    ) -> ApiResult<NewOrderResponse> {
        self.call("new_order", callback, move |c| c.new_order(&order))
    }

    /// Validate an order without sending it to the matching engine.
    pub fn new_order_test(&self, order: NewOrder, callback: Option<ApiCallback<()>>) -> ApiResult<()> {
        self.call("new_order_test", callback, move |c| c.new_order_test(&order))
    }

    pub fn order_status(
        &self,
        request: OrderStatusRequest,
        callback: Option<ApiCallback<Order>>,
    ) -> ApiResult<Order> {
        self.call("order_status", callback, move |c| c.order_status(&request))
    }

    pub fn cancel_order(
        &self,
        request: CancelOrderRequest,
        callback: Option<ApiCallback<CancelOrderResponse>>,
    ) -> ApiResult<CancelOrderResponse> {
        self.call("cancel_order", callback, move |c| c.cancel_order(&request))
    }

    pub fn open_orders(
        &self,
        request: OrderRequest,
        callback: Option<ApiCallback<Vec<Order>>>,
    ) -> ApiResult<Vec<Order>> {
        self.call("open_orders", callback, move |c| c.open_orders(&request))
    }

    pub fn all_orders(
        &self,
        request: AllOrdersRequest,
        callback: Option<ApiCallback<Vec<Order>>>,
    ) -> ApiResult<Vec<Order>> {
        self.call("all_orders", callback, move |c| c.all_orders(&request))
    }

    pub fn account_with(
        &self,
        recv_window: u64,
        timestamp: i64,
        callback: Option<ApiCallback<Account>>,
    ) -> ApiResult<Account> {
        self.call("account", callback, move |c| c.account_with(recv_window, timestamp))
    }

    /// Account snapshot with the default receive window, stamped when the call runs.
    pub fn account(&self, callback: Option<ApiCallback<Account>>) -> ApiResult<Account> {
        self.call("account", callback, |c| c.account())
    }

    pub fn my_trades_with(
        &self,
        symbol: &str,
        limit: Option<u16>,
        from_id: Option<u64>,
        recv_window: u64,
        timestamp: i64,
        callback: Option<ApiCallback<Vec<Trade>>>,
    ) -> ApiResult<Vec<Trade>> {
        let symbol = symbol.to_string();
        self.call("my_trades", callback, move |c| {
            c.my_trades_with(&symbol, limit, from_id, recv_window, timestamp)
        })
    }

    pub fn my_trades_limit(
        &self,
        symbol: &str,
        limit: u16,
        callback: Option<ApiCallback<Vec<Trade>>>,
    ) -> ApiResult<Vec<Trade>> {
        let symbol = symbol.to_string();
        self.call("my_trades", callback, move |c| c.my_trades_limit(&symbol, limit))
    }

    pub fn my_trades(&self, symbol: &str, callback: Option<ApiCallback<Vec<Trade>>>) -> ApiResult<Vec<Trade>> {
        let symbol = symbol.to_string();
        self.call("my_trades", callback, move |c| c.my_trades(&symbol))
    }

    pub fn withdraw(
        &self,
        asset: &str,
        address: &str,
        amount: &str,
        name: Option<&str>,
        address_tag: Option<&str>,
        callback: Option<ApiCallback<WithdrawResult>>,
    ) -> ApiResult<WithdrawResult> {
        let asset = asset.to_string();
        let address = address.to_string();
        let amount = amount.to_string();
        let name = name.map(str::to_string);
        let address_tag = address_tag.map(str::to_string);
        self.call("withdraw", callback, move |c| {
            c.withdraw(&asset, &address, &amount, name.as_deref(), address_tag.as_deref())
        })
    }

    pub fn deposit_history(
        &self,
        asset: &str,
        callback: Option<ApiCallback<DepositHistory>>,
    ) -> ApiResult<DepositHistory> {
        let asset = asset.to_string();
        self.call("deposit_history", callback, move |c| c.deposit_history(&asset))
    }

    pub fn withdraw_history(
        &self,
        asset: &str,
        callback: Option<ApiCallback<WithdrawHistory>>,
    ) -> ApiResult<WithdrawHistory> {
        let asset = asset.to_string();
        self.call("withdraw_history", callback, move |c| c.withdraw_history(&asset))
    }

    pub fn deposit_address(
        &self,
        asset: &str,
        callback: Option<ApiCallback<DepositAddress>>,
    ) -> ApiResult<DepositAddress> {
        let asset = asset.to_string();
        self.call("deposit_address", callback, move |c| c.deposit_address(&asset))
    }

    // -----------------------------------------------------------------------
    // User data stream
    // -----------------------------------------------------------------------

    pub fn start_user_data_stream(&self, callback: Option<ApiCallback<ListenKey>>) -> ApiResult<ListenKey> {
        self.call("start_user_data_stream", callback, |c| c.start_user_data_stream())
    }

    pub fn keep_alive_user_data_stream(
        &self,
        listen_key: &str,
        callback: Option<ApiCallback<()>>,
    ) -> ApiResult<()> {
        let listen_key = listen_key.to_string();
        self.call("keep_alive_user_data_stream", callback, move |c| {
            c.keep_alive_user_data_stream(&listen_key)
        })
    }

    pub fn close_user_data_stream(&self, listen_key: &str, callback: Option<ApiCallback<()>>) -> ApiResult<()> {
        let listen_key = listen_key.to_string();
        self.call("close_user_data_stream", callback, move |c| {
            c.close_user_data_stream(&listen_key)
        })
    }
}

impl std::fmt::Debug for AsyncRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncRestClient")
            .field("bridge", &self.bridge)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{SimulatedClientConfig, SimulatedRestClient};
    use execbridge_executor::{callback, HandleError, Outcome, WorkerPool};
    use rust_decimal_macros::dec;
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn setup(config: SimulatedClientConfig) -> (Arc<SimulatedRestClient>, AsyncRestClient, Vec<Arc<WorkerPool>>) {
        let sim = Arc::new(SimulatedRestClient::new(config));
        let req = Arc::new(WorkerPool::with_workers("req", 2).unwrap());
        let resp = Arc::new(WorkerPool::with_workers("resp", 1).unwrap());
        let client = AsyncRestClient::new(sim.clone(), Bridge::new(req.clone(), resp.clone()));
        (sim, client, vec![req, resp])
    }

    #[test]
    fn test_ping_succeeds_with_unit() {
        let (_sim, client, _pools) = setup(SimulatedClientConfig::default());
        let (tx, rx) = mpsc::channel();

        let handle = client
            .ping(Some(callback(move |outcome| {
                let on_response_pool = thread::current().name() == Some("resp-worker");
                tx.send((outcome, on_response_pool)).unwrap();
            })))
            .unwrap();

        let (outcome, on_response_pool) = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(outcome, Outcome::Success(()));
        assert!(on_response_pool);
        assert_eq!(handle.wait(), Ok(()));
    }

    #[test]
    fn test_invalid_signature_reaches_callback_and_handle() {
        let (sim, client, _pools) = setup(SimulatedClientConfig::default());
        sim.fail("account", ApiError::invalid_signature());
        let (tx, rx) = mpsc::channel();

        let handle = client
            .account(Some(callback(move |outcome| tx.send(outcome).unwrap())))
            .unwrap();

        assert_eq!(
            rx.recv_timeout(TIMEOUT).unwrap(),
            Outcome::Failure(ApiError::invalid_signature())
        );
        assert_eq!(
            handle.wait(),
            Err(HandleError::Failed(ApiError::invalid_signature()))
        );
    }

    #[test]
    fn test_unknown_symbol_fault_is_transparent() {
        let (_sim, client, _pools) = setup(SimulatedClientConfig::default());
        let (tx, rx) = mpsc::channel();

        let handle = client
            .price("NOPEUSDT", Some(callback(move |outcome| tx.send(outcome).unwrap())))
            .unwrap();

        match rx.recv_timeout(TIMEOUT).unwrap() {
            Outcome::Failure(fault) => assert_eq!(fault.code(), Some(INVALID_SYMBOL)),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(handle.wait(), Err(HandleError::Failed(ApiError::invalid_symbol())));
    }

    #[test]
    fn test_arguments_forwarded_unmodified() {
        let (sim, client, _pools) = setup(SimulatedClientConfig::default());

        client
            .agg_trades_with("BTCUSDT", Some(99), Some(10), Some(1_000), Some(2_000), None)
            .unwrap()
            .wait()
            .unwrap();

        let calls = sim.calls();
        let call = calls.last().unwrap();
        assert_eq!(call.operation, "agg_trades");
        assert_eq!(call.args["symbol"], "BTCUSDT");
        assert_eq!(call.args["from_id"], 99);
        assert_eq!(call.args["limit"], 10);
        assert_eq!(call.args["start_time"], 1_000);
        assert_eq!(call.args["end_time"], 2_000);
    }

    #[test]
    fn test_my_trades_defaults_match_canonical_form() {
        let (sim, client, _pools) = setup(SimulatedClientConfig::default());

        let before = now_millis();
        let reduced = client.my_trades("BTCUSDT", None).unwrap().wait().unwrap();
        let canonical = client
            .my_trades_with("BTCUSDT", None, None, DEFAULT_RECV_WINDOW, now_millis(), None)
            .unwrap()
            .wait()
            .unwrap();
        let after = now_millis();

        assert_eq!(reduced, canonical);

        let calls = sim.calls();
        assert_eq!(calls.len(), 2);
        for call in &calls {
            assert_eq!(call.operation, "my_trades");
            assert_eq!(call.args["symbol"], "BTCUSDT");
            assert!(call.args["limit"].is_null());
            assert!(call.args["from_id"].is_null());
            assert_eq!(call.args["recv_window"], DEFAULT_RECV_WINDOW);
            let ts = call.args["timestamp"].as_i64().unwrap();
            assert!(ts >= before && ts <= after);
        }
    }

    #[test]
    fn test_account_defaults_match_canonical_form() {
        let (sim, client, _pools) = setup(SimulatedClientConfig::default());

        let reduced = client.account(None).unwrap().wait().unwrap();
        let canonical = client
            .account_with(DEFAULT_RECV_WINDOW, now_millis(), None)
            .unwrap()
            .wait()
            .unwrap();

        assert_eq!(reduced, canonical);
        let calls = sim.calls();
        assert_eq!(calls[0].args["recv_window"], calls[1].args["recv_window"]);
    }

    #[test]
    fn test_order_lifecycle() {
        let (_sim, client, _pools) = setup(SimulatedClientConfig::default());

        let order = NewOrder::limit_buy("BTCUSDT", TimeInForce::Gtc, dec!(0.1), dec!(30000));
        let placed = client.new_order(order, None).unwrap().wait().unwrap();

        let open = client
            .open_orders(OrderRequest::new("BTCUSDT"), None)
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].order_id, placed.order_id);

        let cancelled = client
            .cancel_order(CancelOrderRequest::by_order_id("BTCUSDT", placed.order_id), None)
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(cancelled.order_id, placed.order_id);

        let status = client
            .order_status(OrderStatusRequest::by_order_id("BTCUSDT", placed.order_id), None)
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(status.status, OrderStatus::Canceled);
    }

    #[test]
    fn test_user_data_stream_returns_listen_key() {
        let (_sim, client, _pools) = setup(SimulatedClientConfig::default());
        let key = client.start_user_data_stream(None).unwrap().wait().unwrap();
        assert!(!key.listen_key.is_empty());

        client
            .keep_alive_user_data_stream(&key.listen_key, None)
            .unwrap()
            .wait()
            .unwrap();
        client
            .close_user_data_stream(&key.listen_key, None)
            .unwrap()
            .wait()
            .unwrap();

        let err = client
            .keep_alive_user_data_stream(&key.listen_key, None)
            .unwrap()
            .wait()
            .unwrap_err();
        assert!(err.failure().is_some());
    }

    #[test]
    fn test_slow_client_does_not_block_caller() {
        let (_sim, client, _pools) = setup(SimulatedClientConfig {
            latency: Duration::from_millis(250),
            ..Default::default()
        });

        let started = Instant::now();
        let handle = client.server_time(None).unwrap();
        assert!(started.elapsed() < Duration::from_millis(250));

        let time = handle.wait().unwrap();
        assert!(time.server_time > 0);
    }

    #[tokio::test]
    async fn test_handles_compose_as_futures() {
        let (_sim, client, _pools) = setup(SimulatedClientConfig::default());
        let (price, book) = futures_util::future::join(
            client.price("BTCUSDT", None).unwrap(),
            client.order_book("BTCUSDT", 5, None).unwrap(),
        )
        .await;

        let price = price.unwrap();
        let book = book.unwrap();
        let best_bid = book.best_bid().unwrap().price;
        assert!(best_bid < price.price);
    }
}
