use crate::async_client::AsyncRestClient;
use execbridge_core::*;
use execbridge_executor::{Bridge, BridgeError, Outcome};
use std::sync::Arc;

/// Outcome delivered to every [`CallbackRestClient`] callback.
pub type ApiOutcome<T> = Outcome<T, ApiError>;

/// Callback-only exchange client.
///
/// Same operations as [`AsyncRestClient`], but each one requires a callback
/// and returns nothing to wait on. The callback runs on the response pool
/// exactly once per accepted call.
#[derive(Clone, Debug)]
pub struct CallbackRestClient {
    inner: AsyncRestClient,
}

macro_rules! forward {
    ($inner:expr, $op:ident($($arg:expr),*), $callback:expr) => {
        $inner
            .$op($($arg,)* Some(execbridge_executor::callback($callback)))
            .map(|_handle| ())
    };
}

impl CallbackRestClient {
    pub fn new(client: Arc<dyn RestClient>, bridge: Bridge) -> Self {
        Self {
            inner: AsyncRestClient::new(client, bridge),
        }
    }

    pub fn from_async(inner: AsyncRestClient) -> Self {
        Self { inner }
    }

    pub fn bridge(&self) -> &Bridge {
        self.inner.bridge()
    }

    // -- General -----------------------------------------------------------

    pub fn ping<F>(&self, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<()>) + Send + 'static,
    {
        forward!(self.inner, ping(), callback)
    }

    pub fn server_time<F>(&self, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<ServerTime>) + Send + 'static,
    {
        forward!(self.inner, server_time(), callback)
    }

    pub fn exchange_info<F>(&self, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<ExchangeInfo>) + Send + 'static,
    {
        forward!(self.inner, exchange_info(), callback)
    }

    pub fn all_assets<F>(&self, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<Vec<Asset>>) + Send + 'static,
    {
        forward!(self.inner, all_assets(), callback)
    }

    // -- Market data -------------------------------------------------------

    pub fn order_book<F>(&self, symbol: &str, limit: u16, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<OrderBook>) + Send + 'static,
    {
        forward!(self.inner, order_book(symbol, limit), callback)
    }

    pub fn trades<F>(&self, symbol: &str, limit: Option<u16>, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<Vec<TradeHistoryItem>>) + Send + 'static,
    {
        forward!(self.inner, trades(symbol, limit), callback)
    }

    pub fn historical_trades<F>(
        &self,
        symbol: &str,
        limit: Option<u16>,
        from_id: Option<u64>,
        callback: F,
    ) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<Vec<TradeHistoryItem>>) + Send + 'static,
    {
        forward!(self.inner, historical_trades(symbol, limit, from_id), callback)
    }

    pub fn agg_trades_with<F>(
        &self,
        symbol: &str,
        from_id: Option<u64>,
        limit: Option<u16>,
        start_time: Option<i64>,
        end_time: Option<i64>,
        callback: F,
    ) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<Vec<AggTrade>>) + Send + 'static,
    {
        forward!(
            self.inner,
            agg_trades_with(symbol, from_id, limit, start_time, end_time),
            callback
        )
    }

    pub fn agg_trades<F>(&self, symbol: &str, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<Vec<AggTrade>>) + Send + 'static,
    {
        forward!(self.inner, agg_trades(symbol), callback)
    }

    pub fn candlestick_bars_with<F>(
        &self,
        symbol: &str,
        interval: CandlestickInterval,
        limit: Option<u16>,
        start_time: Option<i64>,
        end_time: Option<i64>,
        callback: F,
    ) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<Vec<Candlestick>>) + Send + 'static,
    {
        forward!(
            self.inner,
            candlestick_bars_with(symbol, interval, limit, start_time, end_time),
            callback
        )
    }

    pub fn candlestick_bars<F>(
        &self,
        symbol: &str,
        interval: CandlestickInterval,
        callback: F,
    ) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<Vec<Candlestick>>) + Send + 'static,
    {
        forward!(self.inner, candlestick_bars(symbol, interval), callback)
    }

    pub fn ticker_24hr<F>(&self, symbol: &str, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<TickerStatistics>) + Send + 'static,
    {
        forward!(self.inner, ticker_24hr(symbol), callback)
    }

    pub fn all_tickers_24hr<F>(&self, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<Vec<TickerStatistics>>) + Send + 'static,
    {
        forward!(self.inner, all_tickers_24hr(), callback)
    }

    pub fn all_prices<F>(&self, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<Vec<TickerPrice>>) + Send + 'static,
    {
        forward!(self.inner, all_prices(), callback)
    }

    pub fn price<F>(&self, symbol: &str, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<TickerPrice>) + Send + 'static,
    {
        forward!(self.inner, price(symbol), callback)
    }

    pub fn book_tickers<F>(&self, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<Vec<BookTicker>>) + Send + 'static,
    {
        forward!(self.inner, book_tickers(), callback)
    }

    // -- Account -----------------------------------------------------------

    pub fn new_order<F>(&self, order: NewOrder, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<NewOrderResponse>) + Send + 'static,
    {
        forward!(self.inner, new_order(order), callback)
    }

    pub fn new_order_test<F>(&self, order: NewOrder, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<()>) + Send + 'static,
    {
        forward!(self.inner, new_order_test(order), callback)
    }

    pub fn order_status<F>(&self, request: OrderStatusRequest, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<Order>) + Send + 'static,
    {
        forward!(self.inner, order_status(request), callback)
    }

    pub fn cancel_order<F>(&self, request: CancelOrderRequest, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<CancelOrderResponse>) + Send + 'static,
    {
        forward!(self.inner, cancel_order(request), callback)
    }

    pub fn open_orders<F>(&self, request: OrderRequest, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<Vec<Order>>) + Send + 'static,
    {
        forward!(self.inner, open_orders(request), callback)
    }

    pub fn all_orders<F>(&self, request: AllOrdersRequest, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<Vec<Order>>) + Send + 'static,
    {
        forward!(self.inner, all_orders(request), callback)
    }

    pub fn account_with<F>(&self, recv_window: u64, timestamp: i64, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<Account>) + Send + 'static,
    {
        forward!(self.inner, account_with(recv_window, timestamp), callback)
    }

    pub fn account<F>(&self, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<Account>) + Send + 'static,
    {
        forward!(self.inner, account(), callback)
    }

    pub fn my_trades_with<F>(
        &self,
        symbol: &str,
        limit: Option<u16>,
        from_id: Option<u64>,
        recv_window: u64,
        timestamp: i64,
        callback: F,
    ) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<Vec<Trade>>) + Send + 'static,
    {
        forward!(
            self.inner,
            my_trades_with(symbol, limit, from_id, recv_window, timestamp),
            callback
        )
    }

    pub fn my_trades_limit<F>(&self, symbol: &str, limit: u16, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<Vec<Trade>>) + Send + 'static,
    {
        forward!(self.inner, my_trades_limit(symbol, limit), callback)
    }

    pub fn my_trades<F>(&self, symbol: &str, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<Vec<Trade>>) + Send + 'static,
    {
        forward!(self.inner, my_trades(symbol), callback)
    }

    pub fn withdraw<F>(
        &self,
        asset: &str,
        address: &str,
        amount: &str,
        name: Option<&str>,
        address_tag: Option<&str>,
        callback: F,
    ) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<WithdrawResult>) + Send + 'static,
    {
        forward!(
            self.inner,
            withdraw(asset, address, amount, name, address_tag),
            callback
        )
    }

    pub fn deposit_history<F>(&self, asset: &str, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<DepositHistory>) + Send + 'static,
    {
        forward!(self.inner, deposit_history(asset), callback)
    }

    pub fn withdraw_history<F>(&self, asset: &str, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<WithdrawHistory>) + Send + 'static,
    {
        forward!(self.inner, withdraw_history(asset), callback)
    }

    pub fn deposit_address<F>(&self, asset: &str, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<DepositAddress>) + Send + 'static,
    {
        forward!(self.inner, deposit_address(asset), callback)
    }

    // -- User data stream --------------------------------------------------

    pub fn start_user_data_stream<F>(&self, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<ListenKey>) + Send + 'static,
    {
        forward!(self.inner, start_user_data_stream(), callback)
    }

    pub fn keep_alive_user_data_stream<F>(&self, listen_key: &str, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<()>) + Send + 'static,
    {
        forward!(self.inner, keep_alive_user_data_stream(listen_key), callback)
    }

    pub fn close_user_data_stream<F>(&self, listen_key: &str, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(ApiOutcome<()>) + Send + 'static,
    {
        forward!(self.inner, close_user_data_stream(listen_key), callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{SimulatedClientConfig, SimulatedRestClient};
    use execbridge_executor::{Executor, InlineExecutor, WorkerPool};
    use rust_decimal_macros::dec;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn pooled() -> (Arc<SimulatedRestClient>, CallbackRestClient, Vec<Arc<WorkerPool>>) {
        let sim = Arc::new(SimulatedRestClient::new(SimulatedClientConfig::default()));
        let req = Arc::new(WorkerPool::with_workers("cb-req", 2).unwrap());
        let resp = Arc::new(WorkerPool::with_workers("cb-resp", 1).unwrap());
        let client = CallbackRestClient::new(sim.clone(), Bridge::new(req.clone(), resp.clone()));
        (sim, client, vec![req, resp])
    }

    #[test]
    fn test_price_delivered_on_response_pool() {
        let (_sim, client, _pools) = pooled();
        let (tx, rx) = mpsc::channel();

        client
            .price("ETHBTC", move |outcome| {
                let thread_name = thread::current().name().map(str::to_string);
                tx.send((outcome, thread_name)).unwrap();
            })
            .unwrap();

        let (outcome, thread_name) = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(outcome.into_result().unwrap().price, dec!(0.055));
        assert_eq!(thread_name.as_deref(), Some("cb-resp-worker"));
    }

    #[test]
    fn test_fault_delivered_as_failure() {
        let (sim, client, _pools) = pooled();
        sim.fail("deposit_address", ApiError::Transport("timed out".to_string()));
        let (tx, rx) = mpsc::channel();

        client
            .deposit_address("BTC", move |outcome| tx.send(outcome).unwrap())
            .unwrap();

        assert_eq!(
            rx.recv_timeout(TIMEOUT).unwrap(),
            Outcome::Failure(ApiError::Transport("timed out".to_string()))
        );
    }

    #[test]
    fn test_callback_fires_once_per_call() {
        let (_sim, client, _pools) = pooled();
        let (tx, rx) = mpsc::channel();

        for _ in 0..20 {
            let tx = tx.clone();
            client.ping(move |outcome| tx.send(outcome).unwrap()).unwrap();
        }
        drop(tx);

        let delivered: Vec<_> = rx.iter().collect();
        assert_eq!(delivered.len(), 20);
        assert!(delivered.iter().all(Outcome::is_success));
    }

    #[test]
    fn test_rejected_request_returns_error_without_callback() {
        let sim = Arc::new(SimulatedRestClient::new(SimulatedClientConfig::default()));
        let req = Arc::new(WorkerPool::with_workers("closed", 1).unwrap());
        req.shutdown();
        let resp: Arc<dyn Executor> = Arc::new(InlineExecutor::new("inline"));
        let client = CallbackRestClient::new(sim.clone(), Bridge::new(req, resp));

        let (tx, rx) = mpsc::channel::<ApiOutcome<()>>();
        let err = client.ping(move |outcome| tx.send(outcome).unwrap()).unwrap_err();

        assert!(matches!(err, BridgeError::RequestRejected { operation: "ping", .. }));
        assert!(rx.try_recv().is_err());
        assert!(sim.calls().is_empty());
    }

    #[test]
    fn test_inline_pools_run_synchronously() {
        let sim = Arc::new(SimulatedRestClient::new(SimulatedClientConfig::default()));
        let bridge = Bridge::new(
            Arc::new(InlineExecutor::new("req")),
            Arc::new(InlineExecutor::new("resp")),
        );
        let client = CallbackRestClient::new(sim, bridge);
        let (tx, rx) = mpsc::channel();

        client
            .new_order(NewOrder::market_buy("BTCUSDT", dec!(0.01)), move |outcome| {
                tx.send(outcome).unwrap()
            })
            .unwrap();

        // Already delivered by the time the call returns.
        let placed = rx.try_recv().unwrap().into_result().unwrap();
        assert_eq!(placed.symbol, "BTCUSDT");
    }
}
