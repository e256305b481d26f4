use std::{convert::Infallible, process, sync::Arc};

use relcache::{
    cache::{AuthContext, CacheKey, CacheLayer, MemoryStore, QueryContext, invalidation},
    config::{self, Command, InspectArgs, InvalidationArgs, Settings},
    infra::{error::InfraError, telemetry},
    schema::Schema,
    value::Value,
};
use serde_json::{Value as JsonValue, json};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_error(&error);
        process::exit(1);
    }
}

fn report_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "relcache failed");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "relcache failed");
    });
}

async fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let schema = Arc::new(Schema::load(&settings.schema_path).await?);
    info!(
        schema = %settings.schema_path.display(),
        models = schema.len(),
        "Schema ready"
    );
    let layer = build_layer(schema, &settings);

    let output = match &cli_args.command {
        Command::Key(args) => inspect_key(&layer, args)?,
        Command::Tags(args) => inspect_tags(&layer, args)?,
        Command::Invalidations(args) => dry_run_invalidations(&layer, args).await,
    };

    let rendered = serde_json::to_string_pretty(&output).map_err(std::io::Error::from)?;
    println!("{rendered}");
    Ok(())
}

fn build_layer(schema: Arc<Schema>, settings: &Settings) -> CacheLayer {
    CacheLayer::builder(schema)
        .options(settings.cache.clone())
        .memory_store(Arc::new(MemoryStore::new()))
        .build()
}

fn parse_query_args(raw: Option<&str>) -> Result<Option<JsonValue>, InfraError> {
    raw.map(|raw| {
        serde_json::from_str(raw)
            .map_err(|err| InfraError::arguments(format!("--args is not valid JSON: {err}")))
    })
    .transpose()
}

fn inspect_key(layer: &CacheLayer, args: &InspectArgs) -> Result<JsonValue, InfraError> {
    let query_args = parse_query_args(args.args.as_deref())?;
    let auth = args.user.clone().map(AuthContext::user);
    let ctx = query_context(args, query_args.as_ref(), auth.as_ref());

    let key = CacheKey::generate(
        ctx.model,
        ctx.operation.as_str(),
        ctx.args,
        ctx.caller_id(),
    );
    Ok(json!({
        "model": ctx.model,
        "operation": ctx.operation.as_str(),
        "cached": layer.plan(&ctx).is_some(),
        "key": key.segments(),
    }))
}

fn inspect_tags(layer: &CacheLayer, args: &InspectArgs) -> Result<JsonValue, InfraError> {
    let query_args = parse_query_args(args.args.as_deref())?;
    let auth = args.user.clone().map(AuthContext::user);
    let ctx = query_context(args, query_args.as_ref(), auth.as_ref());

    let output = match layer.plan(&ctx) {
        Some(plan) => json!({
            "model": ctx.model,
            "operation": ctx.operation.as_str(),
            "cached": true,
            "life": layer.policy().life_for(ctx.model),
            "ttl_seconds": plan.options.ttl_seconds,
            "tags": plan.options.tags,
        }),
        None => {
            let reason = if layer.policy().is_excluded(ctx.model) {
                "excluded"
            } else {
                "not_read"
            };
            json!({
                "model": ctx.model,
                "operation": ctx.operation.as_str(),
                "cached": false,
                "reason": reason,
            })
        }
    };
    Ok(output)
}

async fn dry_run_invalidations(layer: &CacheLayer, args: &InvalidationArgs) -> JsonValue {
    let rows: Vec<Value> = args
        .row_ids
        .iter()
        .map(|id| Value::map([("id", id.as_str())]))
        .collect();
    let planned = invalidation::plan_mutation_tags(layer.policy(), &args.model, &rows);

    let report = layer
        .after_mutation(&args.model, || async move { Ok::<_, Infallible>(rows) })
        .await;

    json!({
        "model": args.model,
        "excluded": layer.policy().is_excluded(&args.model),
        "planned": planned,
        "report": report,
    })
}

fn query_context<'a>(
    args: &'a InspectArgs,
    query_args: Option<&'a JsonValue>,
    auth: Option<&'a AuthContext>,
) -> QueryContext<'a> {
    let mut ctx = QueryContext::new(&args.model, args.operation.as_str());
    if let Some(query_args) = query_args {
        ctx = ctx.with_args(query_args);
    }
    if let Some(auth) = auth {
        ctx = ctx.with_auth(auth);
    }
    ctx
}
