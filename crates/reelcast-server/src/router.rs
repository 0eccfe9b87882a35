//! Per-connection request handling.
//!
//! [`handle_connection`] reads one request head, dispatches on method and
//! path, writes one response, and closes the socket.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use reelcast_core::{Error, Result, VideoId};

use crate::connection::Connection;
use crate::context::AppContext;
use crate::pages;
use crate::protocol::{self, Request};
use crate::streaming;

/// A resolved request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Listing,
    Video(VideoId),
    Watch(VideoId),
    Thumbnail(VideoId),
    NotFound { entity: &'static str, id: String },
}

/// Map a method and path (query already stripped) to a [`Route`].
pub fn resolve(method: &str, path: &str) -> Route {
    let not_found = |entity: &'static str, id: &str| Route::NotFound {
        entity,
        id: id.to_string(),
    };

    if method != "GET" {
        return not_found("route", &format!("{method} {path}"));
    }
    if path == "/" {
        return Route::Listing;
    }

    let Some((prefix, id)) = path
        .strip_prefix('/')
        .and_then(|rest| rest.split_once('/'))
    else {
        return not_found("route", path);
    };

    let make: fn(VideoId) -> Route = match prefix {
        "videos" => Route::Video,
        "watch" => Route::Watch,
        "thumbnails" => Route::Thumbnail,
        _ => return not_found("route", path),
    };
    match id.parse::<VideoId>() {
        Ok(id) => make(id),
        Err(_) => not_found("video", id),
    }
}

/// Serve one request on `stream` and close it.
pub async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, ctx: AppContext) {
    let metrics = Arc::clone(&ctx.metrics);
    let _gauge = metrics.track_connection();
    let mut conn = Connection::new(peer, ctx.config.streaming.rate_limit_bytes_per_sec);

    let head = {
        let mut reader = BufReader::new(&mut stream);
        tokio::select! {
            head = tokio::time::timeout(
                ctx.config.server.read_timeout(),
                protocol::read_head(&mut reader),
            ) => head,
            _ = ctx.cancel.cancelled() => return,
        }
    };

    let request = match head {
        Ok(Ok(head)) => {
            ctx.metrics.increment_requests();
            head.parse()
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(Error::BadRequest("timed out reading request".into())),
    };

    let result = match request {
        Ok(request) => dispatch(&mut stream, &mut conn, &request, &ctx).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        respond_error(&mut stream, &conn, &ctx, &e).await;
    }

    let _ = stream.shutdown().await;
    tracing::trace!(peer = %peer, age_ms = conn.age().as_millis() as u64, "Connection closed");
}

async fn dispatch(
    stream: &mut TcpStream,
    conn: &mut Connection,
    request: &Request,
    ctx: &AppContext,
) -> Result<()> {
    let route = resolve(&request.method, request.path());
    tracing::debug!(peer = %conn.peer(), method = %request.method, target = %request.target, "Request");

    match route {
        Route::Listing => serve_listing(stream, ctx).await,
        Route::Video(id) => streaming::serve_video(stream, conn, request, &id, ctx).await,
        Route::Watch(id) => serve_watch(stream, &id, ctx).await,
        Route::Thumbnail(id) => serve_thumbnail(stream, &id, ctx).await,
        Route::NotFound { entity, id } => Err(Error::not_found(entity, id)),
    }
}

async fn respond_error(stream: &mut TcpStream, conn: &Connection, ctx: &AppContext, err: &Error) {
    ctx.metrics.increment_errors();
    let status = err.http_status();
    if status >= 500 {
        tracing::error!(peer = %conn.peer(), status, error = %err, "Request failed");
    } else {
        tracing::debug!(peer = %conn.peer(), status, error = %err, "Request rejected");
    }

    let write = protocol::write_error(stream, err);
    match tokio::time::timeout(ctx.config.server.write_timeout(), write).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(peer = %conn.peer(), error = %e, "Failed to write error response"),
        Err(_) => tracing::debug!(peer = %conn.peer(), "Timed out writing error response"),
    }
}

async fn write_page(stream: &mut TcpStream, ctx: &AppContext, content_type: &str, body: &[u8]) {
    let write = protocol::write_response(stream, 200, content_type, body);
    match tokio::time::timeout(ctx.config.server.write_timeout(), write).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(error = %e, "Failed to write response"),
        Err(_) => tracing::debug!("Timed out writing response"),
    }
}

async fn serve_listing(stream: &mut TcpStream, ctx: &AppContext) -> Result<()> {
    let registry = Arc::clone(&ctx.registry);
    tokio::task::spawn_blocking(move || registry.rescan())
        .await
        .map_err(|e| Error::Internal(format!("rescan task failed: {e}")))??;

    let html = pages::render_listing(&ctx.registry.list());
    write_page(stream, ctx, "text/html; charset=utf-8", html.as_bytes()).await;
    Ok(())
}

async fn serve_watch(stream: &mut TcpStream, id: &VideoId, ctx: &AppContext) -> Result<()> {
    let video = ctx
        .registry
        .resolve(id)
        .ok_or_else(|| Error::not_found("video", id))?;
    let html = pages::render_watch(&video);
    write_page(stream, ctx, "text/html; charset=utf-8", html.as_bytes()).await;
    Ok(())
}

async fn serve_thumbnail(stream: &mut TcpStream, id: &VideoId, ctx: &AppContext) -> Result<()> {
    let video = ctx
        .registry
        .resolve(id)
        .ok_or_else(|| Error::not_found("video", id))?;

    let path = tokio::select! {
        path = ctx.thumbnails.ensure_thumbnail(&video) => path?,
        _ = ctx.cancel.cancelled() => return Ok(()),
    };
    let bytes = tokio::fs::read(&path).await?;
    write_page(stream, ctx, "image/jpeg", &bytes).await;
    Ok(())
}
