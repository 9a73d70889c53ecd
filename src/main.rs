use std::time::Duration;

use anyhow::Result;
use depth_cache::{AppConfig, BinanceMarket, DepthCache, MarketIdentity, utils};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    utils::init_logging();

    let config = AppConfig::load()?;
    let identity = MarketIdentity::new("Binance", &config.pair_code, config.fee_rate.clone())?;
    let market = BinanceMarket::new(&config.pair_code, config.cache.request_timeout)?;
    tracing::info!(
        pair = %identity.pair_code,
        symbol = %market.symbol(),
        update_rate = ?config.cache.update_rate,
        expiration = ?config.cache.market_expiration_time,
        push = ?config.push,
        "[INIT] depth-cache starting"
    );

    let cache = DepthCache::new(identity, config.cache.clone(), market);
    let push = cache.spawn_push_listener(&config.push).await?;

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => match cache.get_ticker().await {
                Some(t) => tracing::info!(
                    bid = %t.bid,
                    ask = %t.ask,
                    age = cache.age(),
                    "[TICKER]"
                ),
                None => tracing::warn!("[TICKER] no reliable quote"),
            },
        }
    }

    cache.terminate();
    if let Some(handle) = push {
        handle.join().await;
    }
    tracing::info!("[EXIT] depth-cache stopped");
    Ok(())
}
