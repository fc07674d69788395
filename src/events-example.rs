extern crate dotenv;

use dotenv::dotenv;
use std::env;

use eventsite::events::filter::MonthFilter;
use eventsite::events::Events;
use eventsite::AppConfig;

/// Prints the events of a month, e.g. `events-example 2021 5`, or all events without arguments.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    dotenv().ok();

    let config = AppConfig::load()?;
    let events = Events::from_config(&config.events)?;

    let args: Vec<String> = env::args().skip(1).collect();

    let events = match args.as_slice() {
        [] => events.all().await?,
        [year, month] => {
            let filter = MonthFilter::from_tokens(year, month)?;
            events.in_month(filter).await?
        }
        _ => anyhow::bail!("usage: events-example [YEAR MONTH]"),
    };

    println!("{:#?}", events);

    Ok(())
}
