use execbridge_core::*;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::trace;
use uuid::Uuid;

/// This listenKey does not exist.
const INVALID_LISTEN_KEY: i32 = -1125;
/// Default number of rows for list endpoints.
const DEFAULT_LIMIT: u16 = 500;
const MAX_LIMIT: u16 = 1000;
const QUOTE_ASSETS: [&str; 4] = ["USDT", "BTC", "ETH", "BNB"];

/// Configuration for the simulated client.
#[derive(Debug, Clone)]
pub struct SimulatedClientConfig {
    /// Artificial delay applied to every call.
    pub latency: Duration,
    /// Last price per symbol.
    pub prices: BTreeMap<String, Decimal>,
    /// Starting account balances.
    pub balances: Vec<AssetBalance>,
}

impl Default for SimulatedClientConfig {
    fn default() -> Self {
        let prices = [
            ("BTCUSDT", Decimal::new(42_000, 0)),
            ("ETHUSDT", Decimal::new(2_300, 0)),
            ("ETHBTC", Decimal::new(55, 3)), // 0.055
        ]
        .into_iter()
        .map(|(s, p)| (s.to_string(), p))
        .collect();

        let balance = |asset: &str, free: Decimal| AssetBalance {
            asset: asset.to_string(),
            free,
            locked: Decimal::ZERO,
        };

        Self {
            latency: Duration::ZERO,
            prices,
            balances: vec![
                balance("BTC", Decimal::new(15, 1)),
                balance("ETH", Decimal::new(10, 0)),
                balance("USDT", Decimal::new(10_000, 0)),
            ],
        }
    }
}

/// One recorded call against the simulated client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedCall {
    pub operation: &'static str,
    pub args: Value,
}

#[derive(Default)]
struct State {
    orders: BTreeMap<u64, Order>,
    next_order_id: u64,
    next_update_id: u64,
    listen_keys: HashSet<String>,
    withdrawals: Vec<Withdraw>,
    failures: HashMap<&'static str, ApiError>,
    calls: Vec<RecordedCall>,
}

/// An in-memory exchange implementing [`RestClient`].
///
/// Every call is recorded, delayed by the configured latency, and can be
/// forced to fail with [`fail`](Self::fail). Safe to share across threads.
pub struct SimulatedRestClient {
    config: SimulatedClientConfig,
    state: Mutex<State>,
}

impl SimulatedRestClient {
    pub fn new(config: SimulatedClientConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State {
                next_order_id: 1,
                next_update_id: 1,
                ..Default::default()
            }),
        }
    }

    /// Make every subsequent call to `operation` fail with `fault`.
    pub fn fail(&self, operation: &'static str, fault: ApiError) {
        self.lock().failures.insert(operation, fault);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// All calls made so far, oldest first.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the call, apply latency, then surface any injected fault.
    fn enter(&self, operation: &'static str, args: Value) -> Result<(), ApiError> {
        let failure = {
            let mut state = self.lock();
            state.calls.push(RecordedCall { operation, args });
            state.failures.get(operation).cloned()
        };
        if !self.config.latency.is_zero() {
            thread::sleep(self.config.latency);
        }
        trace!(operation, failing = failure.is_some(), "Simulated call");
        failure.map_or(Ok(()), Err)
    }

    fn last_price(&self, symbol: &str) -> Result<Decimal, ApiError> {
        self.config
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(ApiError::invalid_symbol)
    }

    fn ticker(&self, symbol: &str, price: Decimal) -> TickerStatistics {
        let open = price * Decimal::new(98, 2);
        let change = price - open;
        let now = now_millis();
        TickerStatistics {
            symbol: symbol.to_string(),
            price_change: change,
            price_change_percent: (change / open * Decimal::ONE_HUNDRED).round_dp(3),
            weighted_avg_price: (open + price) / Decimal::TWO,
            prev_close_price: open,
            last_price: price,
            bid_price: price - tick(price),
            ask_price: price + tick(price),
            open_price: open,
            high_price: price * Decimal::new(101, 2),
            low_price: open * Decimal::new(99, 2),
            volume: Decimal::new(1_000, 0),
            open_time: now - 86_400_000,
            close_time: now,
            first_id: 1,
            last_id: 1_000,
            count: 1_000,
        }
    }

    fn find_order<'a>(
        state: &'a mut State,
        symbol: &str,
        order_id: Option<u64>,
        client_order_id: Option<&str>,
    ) -> Result<&'a mut Order, ApiError> {
        state
            .orders
            .values_mut()
            .find(|o| {
                o.symbol == symbol
                    && (order_id == Some(o.order_id)
                        || client_order_id == Some(o.client_order_id.as_str()))
            })
            .ok_or_else(|| ApiError::api(NO_SUCH_ORDER, "Order does not exist."))
    }
}

fn tick(price: Decimal) -> Decimal {
    price * Decimal::new(1, 4)
}

fn row_count(limit: Option<u16>) -> u64 {
    u64::from(limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT))
}

fn split_symbol(symbol: &str) -> (&str, &str) {
    QUOTE_ASSETS
        .iter()
        .find_map(|quote| {
            symbol
                .strip_suffix(quote)
                .filter(|base| !base.is_empty())
                .map(|base| (base, *quote))
        })
        .unwrap_or((symbol, ""))
}

fn interval_millis(interval: CandlestickInterval) -> i64 {
    const MINUTE: i64 = 60_000;
    const HOUR: i64 = 60 * MINUTE;
    const DAY: i64 = 24 * HOUR;
    match interval {
        CandlestickInterval::OneMinute => MINUTE,
        CandlestickInterval::ThreeMinutes => 3 * MINUTE,
        CandlestickInterval::FiveMinutes => 5 * MINUTE,
        CandlestickInterval::FifteenMinutes => 15 * MINUTE,
        CandlestickInterval::HalfHourly => 30 * MINUTE,
        CandlestickInterval::Hourly => HOUR,
        CandlestickInterval::TwoHourly => 2 * HOUR,
        CandlestickInterval::FourHourly => 4 * HOUR,
        CandlestickInterval::SixHourly => 6 * HOUR,
        CandlestickInterval::EightHourly => 8 * HOUR,
        CandlestickInterval::TwelveHourly => 12 * HOUR,
        CandlestickInterval::Daily => DAY,
        CandlestickInterval::ThreeDaily => 3 * DAY,
        CandlestickInterval::Weekly => 7 * DAY,
        CandlestickInterval::Monthly => 30 * DAY,
    }
}

fn synthetic_trades(price: Decimal, first_id: u64, count: u64) -> Vec<TradeHistoryItem> {
    (0..count)
        .map(|i| TradeHistoryItem {
            id: first_id + i,
            price,
            qty: Decimal::ONE,
            time: 1_700_000_000_000 + i as i64 * 1_000,
            is_buyer_maker: i % 2 == 0,
            is_best_match: true,
        })
        .collect()
}

impl RestClient for SimulatedRestClient {
    fn ping(&self) -> Result<(), ApiError> {
        self.enter("ping", Value::Null)
    }

    fn server_time(&self) -> Result<i64, ApiError> {
        self.enter("server_time", Value::Null)?;
        Ok(now_millis())
    }

    fn exchange_info(&self) -> Result<ExchangeInfo, ApiError> {
        self.enter("exchange_info", Value::Null)?;
        let symbols = self
            .config
            .prices
            .keys()
            .map(|symbol| {
                let (base, quote) = split_symbol(symbol);
                SymbolInfo {
                    symbol: symbol.clone(),
                    status: "TRADING".to_string(),
                    base_asset: base.to_string(),
                    base_asset_precision: 8,
                    quote_asset: quote.to_string(),
                    quote_precision: 8,
                    order_types: vec![OrderType::Limit, OrderType::Market, OrderType::LimitMaker],
                    iceberg_allowed: true,
                }
            })
            .collect();
        Ok(ExchangeInfo {
            timezone: "UTC".to_string(),
            server_time: now_millis(),
            rate_limits: vec![RateLimit {
                rate_limit_type: "REQUEST_WEIGHT".to_string(),
                interval: "MINUTE".to_string(),
                limit: 1200,
            }],
            symbols,
        })
    }

    fn all_assets(&self) -> Result<Vec<Asset>, ApiError> {
        self.enter("all_assets", Value::Null)?;
        Ok(self
            .config
            .balances
            .iter()
            .map(|b| Asset {
                asset_code: b.asset.clone(),
                asset_name: b.asset.clone(),
                transaction_fee: Decimal::new(5, 4),
                min_withdraw_amount: Decimal::new(1, 3),
                enable_withdraw: true,
                confirm_times: 2,
            })
            .collect())
    }

    fn order_book(&self, symbol: &str, limit: u16) -> Result<OrderBook, ApiError> {
        self.enter("order_book", json!({ "symbol": symbol, "limit": limit }))?;
        let price = self.last_price(symbol)?;
        let step = tick(price);
        let level = |i: u16, sign: Decimal| OrderBookEntry {
            price: price + sign * step * Decimal::from(u32::from(i) + 1),
            qty: Decimal::ONE,
        };
        let depth = limit.min(MAX_LIMIT);
        let last_update_id = {
            let mut state = self.lock();
            state.next_update_id += 1;
            state.next_update_id
        };
        Ok(OrderBook {
            last_update_id,
            bids: (0..depth).map(|i| level(i, Decimal::NEGATIVE_ONE)).collect(),
            asks: (0..depth).map(|i| level(i, Decimal::ONE)).collect(),
        })
    }

    fn trades(&self, symbol: &str, limit: Option<u16>) -> Result<Vec<TradeHistoryItem>, ApiError> {
        self.enter("trades", json!({ "symbol": symbol, "limit": limit }))?;
        let price = self.last_price(symbol)?;
        Ok(synthetic_trades(price, 1, row_count(limit)))
    }

    fn historical_trades(
        &self,
        symbol: &str,
        limit: Option<u16>,
        from_id: Option<u64>,
    ) -> Result<Vec<TradeHistoryItem>, ApiError> {
        self.enter(
            "historical_trades",
            json!({ "symbol": symbol, "limit": limit, "from_id": from_id }),
        )?;
        let price = self.last_price(symbol)?;
        Ok(synthetic_trades(price, from_id.unwrap_or(1), row_count(limit)))
    }

    fn agg_trades_with(
        &self,
        symbol: &str,
        from_id: Option<u64>,
        limit: Option<u16>,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Result<Vec<AggTrade>, ApiError> {
        self.enter(
            "agg_trades",
            json!({
                "symbol": symbol,
                "from_id": from_id,
                "limit": limit,
                "start_time": start_time,
                "end_time": end_time,
            }),
        )?;
        let price = self.last_price(symbol)?;
        let first = from_id.unwrap_or(1);
        let start = start_time.unwrap_or(1_700_000_000_000);
        Ok((0..row_count(limit))
            .map(|i| AggTrade {
                aggregated_trade_id: first + i,
                price,
                quantity: Decimal::TWO,
                first_breakdown_trade_id: (first + i) * 2,
                last_breakdown_trade_id: (first + i) * 2 + 1,
                trade_time: start + i as i64 * 1_000,
                is_buyer_maker: i % 2 == 1,
            })
            .filter(|t| end_time.map_or(true, |end| t.trade_time <= end))
            .collect())
    }

    fn candlestick_bars_with(
        &self,
        symbol: &str,
        interval: CandlestickInterval,
        limit: Option<u16>,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Result<Vec<Candlestick>, ApiError> {
        self.enter(
            "candlestick_bars",
            json!({
                "symbol": symbol,
                "interval": interval.as_str(),
                "limit": limit,
                "start_time": start_time,
                "end_time": end_time,
            }),
        )?;
        let price = self.last_price(symbol)?;
        let width = interval_millis(interval);
        let start = start_time.unwrap_or(1_700_000_000_000);
        Ok((0..row_count(limit))
            .map(|i| {
                let open_time = start + i as i64 * width;
                Candlestick {
                    open_time,
                    open: price,
                    high: price + tick(price),
                    low: price - tick(price),
                    close: price,
                    volume: Decimal::TEN,
                    close_time: open_time + width - 1,
                    quote_asset_volume: price * Decimal::TEN,
                    number_of_trades: 10,
                    taker_buy_base_asset_volume: Decimal::new(5, 0),
                    taker_buy_quote_asset_volume: price * Decimal::new(5, 0),
                }
            })
            .take_while(|c| end_time.map_or(true, |end| c.open_time <= end))
            .collect())
    }

    fn ticker_24hr(&self, symbol: &str) -> Result<TickerStatistics, ApiError> {
        self.enter("ticker_24hr", json!({ "symbol": symbol }))?;
        let price = self.last_price(symbol)?;
        Ok(self.ticker(symbol, price))
    }

    fn all_tickers_24hr(&self) -> Result<Vec<TickerStatistics>, ApiError> {
        self.enter("all_tickers_24hr", Value::Null)?;
        Ok(self
            .config
            .prices
            .iter()
            .map(|(symbol, price)| self.ticker(symbol, *price))
            .collect())
    }

    fn all_prices(&self) -> Result<Vec<TickerPrice>, ApiError> {
        self.enter("all_prices", Value::Null)?;
        Ok(self
            .config
            .prices
            .iter()
            .map(|(symbol, price)| TickerPrice {
                symbol: symbol.clone(),
                price: *price,
            })
            .collect())
    }

    fn price(&self, symbol: &str) -> Result<TickerPrice, ApiError> {
        self.enter("price", json!({ "symbol": symbol }))?;
        Ok(TickerPrice {
            symbol: symbol.to_string(),
            price: self.last_price(symbol)?,
        })
    }

    fn book_tickers(&self) -> Result<Vec<BookTicker>, ApiError> {
        self.enter("book_tickers", Value::Null)?;
        Ok(self
            .config
            .prices
            .iter()
            .map(|(symbol, price)| BookTicker {
                symbol: symbol.clone(),
                bid_price: *price - tick(*price),
                bid_qty: Decimal::ONE,
                ask_price: *price + tick(*price),
                ask_qty: Decimal::ONE,
            })
            .collect())
    }

    fn new_order(&self, order: &NewOrder) -> Result<NewOrderResponse, ApiError> {
        self.enter("new_order", json!(order))?;
        let market_price = self.last_price(&order.symbol)?;

        let (status, executed, price) = match order.order_type {
            OrderType::Market => (OrderStatus::Filled, order.quantity, market_price),
            _ => (OrderStatus::New, Decimal::ZERO, order.price.unwrap_or(market_price)),
        };
        let client_order_id = order
            .new_client_order_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let now = now_millis();

        let mut state = self.lock();
        let order_id = state.next_order_id;
        state.next_order_id += 1;
        state.orders.insert(
            order_id,
            Order {
                symbol: order.symbol.clone(),
                order_id,
                client_order_id: client_order_id.clone(),
                price,
                orig_qty: order.quantity,
                executed_qty: executed,
                status,
                time_in_force: order.time_in_force,
                order_type: order.order_type,
                side: order.side,
                stop_price: order.stop_price,
                iceberg_qty: order.iceberg_qty,
                time: now,
            },
        );

        Ok(NewOrderResponse {
            symbol: order.symbol.clone(),
            order_id,
            client_order_id,
            transact_time: now,
        })
    }

    fn new_order_test(&self, order: &NewOrder) -> Result<(), ApiError> {
        self.enter("new_order_test", json!(order))?;
        self.last_price(&order.symbol).map(|_| ())
    }

    fn order_status(&self, request: &OrderStatusRequest) -> Result<Order, ApiError> {
        self.enter("order_status", json!(request))?;
        let mut state = self.lock();
        Self::find_order(
            &mut state,
            &request.symbol,
            request.order_id,
            request.orig_client_order_id.as_deref(),
        )
        .map(|o| o.clone())
    }

    fn cancel_order(&self, request: &CancelOrderRequest) -> Result<CancelOrderResponse, ApiError> {
        self.enter("cancel_order", json!(request))?;
        let mut state = self.lock();
        let order = Self::find_order(
            &mut state,
            &request.symbol,
            request.order_id,
            request.orig_client_order_id.as_deref(),
        )?;
        if !order.is_working() {
            return Err(ApiError::api(NO_SUCH_ORDER, "Unknown order sent."));
        }
        order.status = OrderStatus::Canceled;
        Ok(CancelOrderResponse {
            symbol: order.symbol.clone(),
            orig_client_order_id: order.client_order_id.clone(),
            order_id: order.order_id,
            client_order_id: request
                .new_client_order_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
        })
    }

    fn open_orders(&self, request: &OrderRequest) -> Result<Vec<Order>, ApiError> {
        self.enter("open_orders", json!(request))?;
        Ok(self
            .lock()
            .orders
            .values()
            .filter(|o| o.symbol == request.symbol && o.is_working())
            .cloned()
            .collect())
    }

    fn all_orders(&self, request: &AllOrdersRequest) -> Result<Vec<Order>, ApiError> {
        self.enter("all_orders", json!(request))?;
        let from = request.order_id.unwrap_or(0);
        Ok(self
            .lock()
            .orders
            .range(from..)
            .map(|(_, o)| o)
            .filter(|o| o.symbol == request.symbol)
            .take(usize::from(request.limit.unwrap_or(DEFAULT_LIMIT)))
            .cloned()
            .collect())
    }

    fn account_with(&self, recv_window: u64, timestamp: i64) -> Result<Account, ApiError> {
        self.enter(
            "account",
            json!({ "recv_window": recv_window, "timestamp": timestamp }),
        )?;
        Ok(Account {
            maker_commission: 10,
            taker_commission: 10,
            buyer_commission: 0,
            seller_commission: 0,
            can_trade: true,
            can_withdraw: true,
            can_deposit: true,
            update_time: 0,
            balances: self.config.balances.clone(),
        })
    }

    fn my_trades_with(
        &self,
        symbol: &str,
        limit: Option<u16>,
        from_id: Option<u64>,
        recv_window: u64,
        timestamp: i64,
    ) -> Result<Vec<Trade>, ApiError> {
        self.enter(
            "my_trades",
            json!({
                "symbol": symbol,
                "limit": limit,
                "from_id": from_id,
                "recv_window": recv_window,
                "timestamp": timestamp,
            }),
        )?;
        let (_, quote) = split_symbol(symbol);
        let from = from_id.unwrap_or(0);
        // Each filled order produced exactly one trade with the same id.
        Ok(self
            .lock()
            .orders
            .range(from..)
            .map(|(_, o)| o)
            .filter(|o| o.symbol == symbol && o.status == OrderStatus::Filled)
            .take(usize::from(limit.unwrap_or(DEFAULT_LIMIT)))
            .map(|o| Trade {
                id: o.order_id,
                symbol: o.symbol.clone(),
                order_id: o.order_id,
                price: o.price,
                qty: o.executed_qty,
                commission: o.price * o.executed_qty * Decimal::new(1, 3),
                commission_asset: quote.to_string(),
                time: o.time,
                is_buyer: o.side == OrderSide::Buy,
                is_maker: false,
                is_best_match: true,
            })
            .collect())
    }

    fn withdraw(
        &self,
        asset: &str,
        address: &str,
        amount: &str,
        name: Option<&str>,
        address_tag: Option<&str>,
    ) -> Result<WithdrawResult, ApiError> {
        self.enter(
            "withdraw",
            json!({
                "asset": asset,
                "address": address,
                "amount": amount,
                "name": name,
                "address_tag": address_tag,
            }),
        )?;
        let amount: Decimal = amount
            .parse()
            .map_err(|e| ApiError::api(-1100, format!("Illegal characters found in parameter 'amount': {e}")))?;
        let id = Uuid::new_v4().simple().to_string();
        self.lock().withdrawals.push(Withdraw {
            id: id.clone(),
            amount,
            address: address.to_string(),
            asset: asset.to_string(),
            apply_time: now_millis(),
            tx_id: None,
            status: 0,
        });
        Ok(WithdrawResult {
            msg: "success".to_string(),
            success: true,
            id,
        })
    }

    fn deposit_history(&self, asset: &str) -> Result<DepositHistory, ApiError> {
        self.enter("deposit_history", json!({ "asset": asset }))?;
        Ok(DepositHistory {
            deposit_list: Vec::new(),
            success: true,
        })
    }

    fn withdraw_history(&self, asset: &str) -> Result<WithdrawHistory, ApiError> {
        self.enter("withdraw_history", json!({ "asset": asset }))?;
        Ok(WithdrawHistory {
            withdraw_list: self
                .lock()
                .withdrawals
                .iter()
                .filter(|w| w.asset == asset)
                .cloned()
                .collect(),
            success: true,
        })
    }

    fn deposit_address(&self, asset: &str) -> Result<DepositAddress, ApiError> {
        self.enter("deposit_address", json!({ "asset": asset }))?;
        Ok(DepositAddress {
            address: format!("sim-{}-deposit", asset.to_lowercase()),
            success: true,
            address_tag: None,
            asset: asset.to_string(),
        })
    }

    fn start_user_data_stream(&self) -> Result<ListenKey, ApiError> {
        self.enter("start_user_data_stream", Value::Null)?;
        let listen_key = Uuid::new_v4().simple().to_string();
        self.lock().listen_keys.insert(listen_key.clone());
        Ok(ListenKey { listen_key })
    }

    fn keep_alive_user_data_stream(&self, listen_key: &str) -> Result<(), ApiError> {
        self.enter("keep_alive_user_data_stream", json!({ "listen_key": listen_key }))?;
        if self.lock().listen_keys.contains(listen_key) {
            Ok(())
        } else {
            Err(ApiError::api(INVALID_LISTEN_KEY, "This listenKey does not exist."))
        }
    }

    fn close_user_data_stream(&self, listen_key: &str) -> Result<(), ApiError> {
        self.enter("close_user_data_stream", json!({ "listen_key": listen_key }))?;
        if self.lock().listen_keys.remove(listen_key) {
            Ok(())
        } else {
            Err(ApiError::api(INVALID_LISTEN_KEY, "This listenKey does not exist."))
        }
    }
}
