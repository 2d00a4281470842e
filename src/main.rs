use std::{
    io::{self, Read},
    process,
    sync::Arc,
};

use postloop::{
    application::{
        compiler::QueryCompiler,
        controller::{LoopController, LoopOptions},
        error::AppError,
        pagination::page_links,
    },
    cache::{CacheConfig, ResponseCache, cache_key, logical_query_key},
    config,
    domain::query::QueryState,
    infra::{content_api::RestContentApi, telemetry},
};
use serde_json::json;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        config::Command::Compile(args) => run_compile(&settings, args),
        config::Command::Pages(args) => run_pages(args),
        config::Command::Fetch(args) => run_fetch(settings, args).await,
    }
}

fn run_compile(settings: &config::Settings, args: config::CompileArgs) -> Result<(), AppError> {
    let state = read_state(&args.state)?;
    let compiler = QueryCompiler::new(settings.controller.timezone);

    let params = match args.at.as_deref() {
        Some(raw) => {
            let now = OffsetDateTime::parse(raw, &Rfc3339)
                .map_err(|err| AppError::validation(format!("invalid --at `{raw}`: {err}")))?;
            compiler.compile_at(&state, now)
        }
        None => compiler.compile(&state),
    };

    let collection = state.collection();
    print_json(&json!({
        "collection": collection,
        "params": params.to_json_object(),
        "cache_key": cache_key(collection, &params),
        "query_key": logical_query_key(collection, &params),
    }))
}

fn run_pages(args: config::PagesArgs) -> Result<(), AppError> {
    print_json(&json!(page_links(args.total, args.current)))
}

async fn run_fetch(settings: config::Settings, args: config::FetchArgs) -> Result<(), AppError> {
    let state = read_state(&args.state)?;

    let api = Arc::new(RestContentApi::new(&settings.api)?);
    let cache = Arc::new(ResponseCache::new(CacheConfig::from(&settings.cache)));
    cache.start_sweeper();

    let controller = LoopController::new(
        api,
        Arc::clone(&cache),
        QueryCompiler::new(settings.controller.timezone),
        LoopOptions::from(&settings.controller),
    );

    info!(
        target = "postloop::fetch",
        base_url = %settings.api.base_url,
        collection = state.collection(),
        more = args.more,
        "Loading query"
    );

    let result = fetch_pages(&controller, state, args.more).await;

    controller.dispose();
    cache.dispose();

    let stats = cache.stats();
    info!(
        target = "postloop::fetch",
        cached = stats.size,
        max_size = stats.max_size,
        "Fetch finished"
    );

    result
}

async fn fetch_pages(
    controller: &LoopController,
    state: QueryState,
    more: u32,
) -> Result<(), AppError> {
    let mut view = controller.load(state).await?;
    for _ in 0..more {
        if !view.has_more {
            break;
        }
        view = controller.load_more().await?;
    }

    print_json(&json!({
        "view": view,
        "page_links": controller.page_links(),
    }))
}

/// Query state from inline JSON, `@path`, or `-` for stdin. Blank input
/// yields the default state.
fn read_state(source: &str) -> Result<QueryState, AppError> {
    let raw = match source.trim() {
        "-" => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
        value => match value.strip_prefix('@') {
            Some(path) => std::fs::read_to_string(path)?,
            None => value.to_string(),
        },
    };

    if raw.trim().is_empty() {
        return Ok(QueryState::default());
    }
    Ok(serde_json::from_str(&raw)?)
}

fn print_json(value: &serde_json::Value) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
