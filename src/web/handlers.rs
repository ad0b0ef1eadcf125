//! API Handlers
use std::collections::HashMap;

use actix_web::{http::StatusCode, web::Data, HttpRequest, HttpResponse};
use serde::Serialize;
use serde_json::{json, Value};

use crate::db::{
    params,
    results::Paginated,
    store::{encode_batch_id, parse_batch_bsos},
    DbError, UserDb,
};
use crate::error::{ApiError, ApiErrorKind};
use crate::server::ServerState;
use crate::web::{
    dispatch::UserDispatch,
    error::ValidationErrorKind,
    extractors::{
        BsoPutRequest, BsoRequest, CollectionPostRequest, CollectionRequest, MetaRequest,
        ReplyFormat, RequestErrorLocation,
    },
    X_LAST_MODIFIED, X_WEAVE_NEXT_OFFSET, X_WEAVE_RECORDS,
};

pub const ONE_KB: f64 = 1024.0;

pub async fn get_collections(
    meta: MetaRequest,
    dispatch: UserDispatch,
) -> Result<HttpResponse, ApiError> {
    dispatch
        .serialized_http(|db| async move {
            meta.emit_api_metric("request.get_collections");
            let result = db.get_collection_timestamps().await?;

            Ok(HttpResponse::build(StatusCode::OK)
                .insert_header((X_WEAVE_RECORDS, result.len().to_string()))
                .json(result))
        })
        .await
}

pub async fn get_collection_counts(
    meta: MetaRequest,
    dispatch: UserDispatch,
) -> Result<HttpResponse, ApiError> {
    dispatch
        .serialized_http(|db| async move {
            meta.emit_api_metric("request.get_collection_counts");
            let result = db.get_collection_counts().await?;

            Ok(HttpResponse::build(StatusCode::OK)
                .insert_header((X_WEAVE_RECORDS, result.len().to_string()))
                .json(result))
        })
        .await
}

pub async fn get_collection_usage(
    meta: MetaRequest,
    dispatch: UserDispatch,
) -> Result<HttpResponse, ApiError> {
    dispatch
        .serialized_http(|db| async move {
            meta.emit_api_metric("request.get_collection_usage");
            let usage: HashMap<_, _> = db
                .get_collection_usage()
                .await?
                .into_iter()
                .map(|(coll, size)| (coll, size as f64 / ONE_KB))
                .collect();

            Ok(HttpResponse::build(StatusCode::OK)
                .insert_header((X_WEAVE_RECORDS, usage.len().to_string()))
                .json(usage))
        })
        .await
}

pub async fn get_quota(
    meta: MetaRequest,
    dispatch: UserDispatch,
) -> Result<HttpResponse, ApiError> {
    dispatch
        .serialized_http(|db| async move {
            meta.emit_api_metric("request.get_quota");
            let usage = db.get_storage_usage().await?;
            Ok(HttpResponse::Ok().json(vec![Some(usage as f64 / ONE_KB), None]))
        })
        .await
}

pub async fn delete_all(
    meta: MetaRequest,
    dispatch: UserDispatch,
) -> Result<HttpResponse, ApiError> {
    dispatch
        .serialized_http(|db| async move {
            meta.emit_api_metric("request.delete_all");
            info!("Deleting all user data"; "uid" => meta.user_id.uid.as_str());
            let modified = db.delete_storage().await?;
            Ok(HttpResponse::Ok()
                .insert_header((X_LAST_MODIFIED, modified.as_header()))
                .json(modified))
        })
        .await
}

pub async fn delete_collection(
    coll: CollectionRequest,
    dispatch: UserDispatch,
) -> Result<HttpResponse, ApiError> {
    dispatch
        .serialized_http(|db| async move {
            let delete_bsos = !coll.query.ids.is_empty();
            let timestamp = if delete_bsos {
                coll.emit_api_metric("request.delete_bsos");
                db.delete_bsos(params::DeleteBsos {
                    collection: coll.collection.clone(),
                    ids: coll.query.ids.clone(),
                })
                .await
            } else {
                coll.emit_api_metric("request.delete_collection");
                db.delete_collection(params::DeleteCollection {
                    collection: coll.collection.clone(),
                })
                .await
            };

            let timestamp = match timestamp {
                Ok(timestamp) => timestamp,
                Err(e) => {
                    // deleting something that's already gone still reports
                    // the current server time
                    if e.is_collection_not_found() || e.is_bso_not_found() {
                        db.timestamp()
                    } else {
                        return Err(e.into());
                    }
                }
            };

            Ok(HttpResponse::Ok()
                .insert_header((X_LAST_MODIFIED, timestamp.as_header()))
                .json(timestamp))
        })
        .await
}

pub async fn get_collection(
    coll: CollectionRequest,
    dispatch: UserDispatch,
) -> Result<HttpResponse, ApiError> {
    dispatch
        .serialized_http(|db| async move {
            coll.emit_api_metric("request.get_collection");
            trace!("Collection: Get"; "uid" => coll.user_id.uid.as_str());
            let params = params::GetBsos {
                collection: coll.collection.clone(),
                newer: coll.query.newer,
                older: coll.query.older,
                sort: coll.query.sort,
                limit: coll.query.limit,
                offset: coll.query.offset.clone().map(Into::into),
                ids: coll.query.ids.clone(),
                full: coll.query.full,
            };
            let response = if coll.query.full {
                let result = db.get_bsos(params).await;
                finish_get_collection(&coll, &db, result).await?
            } else {
                let result = db.get_bso_ids(params).await;
                finish_get_collection(&coll, &db, result).await?
            };
            Ok(response)
        })
        .await
}

async fn finish_get_collection<T>(
    coll: &CollectionRequest,
    db: &UserDb,
    result: Result<Paginated<T>, DbError>,
) -> Result<HttpResponse, ApiError>
where
    T: Serialize + Default + 'static,
{
    let result = result.or_else(|e| {
        if e.is_collection_not_found() {
            // For b/w compat, non-existent collections must return an
            // empty list
            Ok(Paginated::default())
        } else {
            Err(e)
        }
    })?;

    let ts = db
        .extract_resource(Some(coll.collection.clone()), None)
        .await?;

    let mut builder = HttpResponse::build(StatusCode::OK);
    let resp = builder
        .insert_header((X_LAST_MODIFIED, ts.as_header()))
        .insert_header((X_WEAVE_RECORDS, result.items.len().to_string()));

    if let Some(offset) = result.offset {
        resp.insert_header((X_WEAVE_NEXT_OFFSET, offset));
    }

    match coll.reply {
        ReplyFormat::Json => Ok(resp.json(result.items)),
        ReplyFormat::Newlines => {
            let items: String = result
                .items
                .into_iter()
                .map(|v| serde_json::to_string(&v).unwrap_or_else(|_| "".to_string()))
                .filter(|v| !v.is_empty())
                .map(|v| v.replace('\n', "\\u000a") + "\n")
                .collect();

            Ok(resp
                .insert_header(("Content-Type", "application/newlines"))
                .insert_header(("Content-Length", format!("{}", items.len())))
                .body(items))
        }
    }
}

pub async fn post_collection(
    coll: CollectionPostRequest,
    dispatch: UserDispatch,
    request: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    dispatch
        .serialized_http(|db| async move {
            coll.emit_api_metric("request.post_collection");
            trace!("Collection: Post"; "uid" => coll.user_id.uid.as_str());

            // batches are a conceptual, singular update, so we should handle
            // them separately.
            if let Some(ref batch) = coll.batch {
                // Optimization: specifying ?batch=true&commit=true
                // (batch.id.is_none() && batch.commit) is equivalent to a
                // simpler post_bsos call. Fallthrough in that case, instead
                // of incurring post_collection_batch's overhead
                if !(batch.id.is_none() && batch.commit) {
                    return post_collection_batch(coll, db, &request).await;
                }
            }

            let bsos: Vec<params::PostCollectionBso> =
                coll.bsos.valid.into_iter().map(From::from).collect();

            let result = db
                .post_bsos(params::PostBsos {
                    collection: coll.collection,
                    bsos,
                    failed: coll.bsos.invalid,
                })
                .await?;

            Ok(HttpResponse::build(StatusCode::OK)
                .insert_header((X_LAST_MODIFIED, result.modified.as_header()))
                .json(json!({
                    "modified": result.modified,
                    "success": result.success,
                    "failed": result.failed,
                })))
        })
        .await
}

// Append additional collection items into the given Batch, optionally
// commiting the entire, accumulated set if the `commit` flag is set.
pub async fn post_collection_batch(
    coll: CollectionPostRequest,
    db: UserDb,
    request: &HttpRequest,
) -> Result<HttpResponse, ApiError> {
    coll.emit_api_metric("request.post_collection_batch");
    trace!("Batch: Post collection batch");
    // Bail early if we have nonsensical arguments
    let breq = coll
        .batch
        .clone()
        .ok_or_else(|| -> ApiError { ApiErrorKind::Db(DbError::batch_not_found()).into() })?;

    let state = request
        .app_data::<Data<ServerState>>()
        .ok_or_else(|| -> ApiError { ApiErrorKind::NoServerState.into() })?;
    let limits = &state.limits;

    // nothing is visible until commit: X-Last-Modified stays at the
    // pre-batch collection timestamp
    let pre_batch_modified = db
        .extract_resource(Some(coll.collection.clone()), None)
        .await?;

    let mut failed = coll.bsos.invalid.clone();
    let bso_ids: Vec<_> = coll.bsos.valid.iter().map(|bso| bso.id.clone()).collect();
    let bsos: Vec<params::PostCollectionBso> =
        coll.bsos.valid.into_iter().map(From::from).collect();

    // Append this request's records first; the batch size checks apply to
    // the combined state.
    let wire_id = if let Some(id) = breq.id.clone() {
        trace!("Batch: Validating {}", &id);
        // Validate the batch before attempting a full append (for efficiency)
        let is_valid = db
            .validate_batch(params::ValidateBatch {
                collection: coll.collection.clone(),
                id: id.clone(),
            })
            .await?;
        if !is_valid {
            return Err(ApiErrorKind::Db(DbError::batch_not_found()).into());
        }

        trace!("Batch: Appending to {}", &id);
        if !bsos.is_empty() {
            db.append_to_batch(params::AppendToBatch {
                collection: coll.collection.clone(),
                id: id.clone(),
                bsos,
            })
            .await?;
        }
        id
    } else {
        trace!("Batch: Creating new batch");
        let batch_id = db
            .create_batch(params::CreateBatch {
                collection: coll.collection.clone(),
                bsos,
            })
            .await?;
        encode_batch_id(batch_id)
    };

    if !breq.commit {
        // Return the batch append response without committing the
        // accumulated set to the BSO table.
        let mut resp: Value = json!({});
        resp["success"] = json!(bso_ids);
        resp["failed"] = json!(failed);
        resp["batch"] = json!(&wire_id);
        resp["modified"] = json!(pre_batch_modified);
        return Ok(HttpResponse::Accepted()
            .insert_header((X_LAST_MODIFIED, pre_batch_modified.as_header()))
            .json(resp));
    }

    // We've been asked to commit the accumulated data, so get to it!
    let batch = db
        .get_batch(params::GetBatch {
            collection: coll.collection.clone(),
            id: wire_id.clone(),
        })
        .await?
        .ok_or_else(|| -> ApiError { ApiErrorKind::Db(DbError::batch_not_found()).into() })?;

    // Enforce the whole-batch limits against everything accumulated so far.
    let accumulated = parse_batch_bsos(&batch.bsos)?;
    let total_bytes: usize = accumulated
        .iter()
        .map(|bso| bso.payload.as_ref().map(String::len).unwrap_or_default())
        .sum();
    if accumulated.len() > limits.max_total_records as usize
        || total_bytes > limits.max_total_bytes as usize
    {
        db.delete_batch(params::DeleteBatch {
            collection: coll.collection.clone(),
            id: wire_id,
        })
        .await?;
        return Err(ValidationErrorKind::FromDetails(
            "size-limit-exceeded".to_owned(),
            RequestErrorLocation::Body,
            None,
            Some("request.validate.batch.size_exceeded"),
        )
        .into());
    }

    let result = db
        .commit_batch(params::CommitBatch {
            collection: coll.collection.clone(),
            id: wire_id,
        })
        .await?;

    let success_count = result.success.len();
    failed.extend(result.failed);

    trace!("Batch: Committed {} records", success_count);
    Ok(HttpResponse::build(StatusCode::OK)
        .insert_header((X_LAST_MODIFIED, result.modified.as_header()))
        .json(json!({
            "modified": result.modified,
            "success": result.success,
            "failed": failed,
        })))
}

pub async fn delete_bso(
    bso_req: BsoRequest,
    dispatch: UserDispatch,
) -> Result<HttpResponse, ApiError> {
    dispatch
        .serialized_http(|db| async move {
            bso_req.emit_api_metric("request.delete_bso");
            trace!("BSO: Delete"; "uid" => bso_req.user_id.uid.as_str());
            let result = db
                .delete_bso(params::DeleteBso {
                    collection: bso_req.collection,
                    id: bso_req.bso,
                })
                .await?;
            Ok(HttpResponse::Ok()
                .insert_header((X_LAST_MODIFIED, result.as_header()))
                .json(json!({ "modified": result })))
        })
        .await
}

pub async fn get_bso(
    bso_req: BsoRequest,
    dispatch: UserDispatch,
) -> Result<HttpResponse, ApiError> {
    dispatch
        .serialized_http(|db| async move {
            bso_req.emit_api_metric("request.get_bso");
            let result = db
                .get_bso(params::GetBso {
                    collection: bso_req.collection,
                    id: bso_req.bso,
                })
                .await?;

            Ok(result.map_or_else(
                || HttpResponse::NotFound().finish(),
                |bso| HttpResponse::Ok().json(bso),
            ))
        })
        .await
}

pub async fn put_bso(
    bso_req: BsoPutRequest,
    dispatch: UserDispatch,
) -> Result<HttpResponse, ApiError> {
    dispatch
        .serialized_http(|db| async move {
            bso_req.emit_api_metric("request.put_bso");
            trace!("BSO: Put"; "uid" => bso_req.user_id.uid.as_str());
            let result = db
                .put_bso(params::PutBso {
                    collection: bso_req.collection,
                    id: bso_req.bso,
                    sortindex: bso_req.body.sortindex,
                    payload: bso_req.body.payload,
                    ttl: bso_req.body.ttl,
                })
                .await?;

            Ok(HttpResponse::build(StatusCode::OK)
                .insert_header((X_LAST_MODIFIED, result.as_header()))
                .json(result))
        })
        .await
}

pub async fn get_configuration(state: Data<ServerState>) -> HttpResponse {
    // The service limits are hardcoded per instance: no store access, no
    // preconditions, just ensure an X-Last-Modified (always 0.00) is present
    HttpResponse::Ok()
        .insert_header((X_LAST_MODIFIED, "0.00"))
        .content_type("application/json")
        .body(state.limits_json.clone())
}

/// Returns a status message indicating the state of the current server
pub async fn heartbeat(state: Data<ServerState>) -> Result<HttpResponse, ApiError> {
    let mut checklist = HashMap::new();
    checklist.insert(
        "version".to_owned(),
        Value::String(env!("CARGO_PKG_VERSION").to_owned()),
    );

    if state.pool.is_stopped() {
        checklist.insert("status".to_owned(), Value::from("Err"));
        checklist.insert("storage".to_owned(), Value::from("shutting down"));
        return Ok(HttpResponse::ServiceUnavailable().json(checklist));
    }

    match state.pool.check() {
        Ok(result) => {
            if result {
                checklist.insert("storage".to_owned(), Value::from("Ok"));
            } else {
                checklist.insert("storage".to_owned(), Value::from("Err"));
                checklist.insert(
                    "storage_msg".to_owned(),
                    Value::from("check failed without error"),
                );
            };
            let status = if result { "Ok" } else { "Err" };
            checklist.insert("status".to_owned(), Value::from(status));
            checklist.insert(
                "active_blocking_threads".to_owned(),
                Value::from(state.pool.blocking_threadpool().active_threads()),
            );

            if result {
                Ok(HttpResponse::Ok().json(checklist))
            } else {
                Ok(HttpResponse::ServiceUnavailable().json(checklist))
            }
        }
        Err(e) => {
            error!("Heartbeat error: {:?}", e);
            checklist.insert("status".to_owned(), Value::from("Err"));
            checklist.insert("storage".to_owned(), Value::from("Unknown"));
            Ok(HttpResponse::ServiceUnavailable().json(checklist))
        }
    }
}

pub async fn lbheartbeat(_: HttpRequest) -> HttpResponse {
    // used by the load balancers, just return OK.
    HttpResponse::Ok()
        .content_type("application/json")
        .body("{}")
}
