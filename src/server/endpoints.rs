use std::sync::Arc;

use bytes::Bytes;
use dropshot::{endpoint, HttpError, HttpResponseOk, MultipartBody, RequestContext, UntypedBody};
use flashforge::http::{AuthRequest, ControlCommand, ControlRequest, Credentials, Envelope, FileRequest, PrintRequest};

use super::{handlers, Context};
use crate::state::PrinterState;

type EnvelopeResult = Result<HttpResponseOk<serde_json::Value>, HttpError>;

fn respond(envelope: Envelope) -> EnvelopeResult {
    tracing::debug!(code = envelope.code, message = %envelope.message, "http response");
    serde_json::to_value(&envelope)
        .map(HttpResponseOk)
        .map_err(|e| HttpError::for_internal_error(format!("{:?}", e)))
}

fn authorized(state: &PrinterState, credentials: &Credentials) -> Result<(), Envelope> {
    if state.authenticate(credentials) {
        Ok(())
    } else {
        tracing::info!(serial = %credentials.serial_number, "rejected credentials");
        Err(Envelope::auth_failed())
    }
}

/** Report which controls the printer exposes. */
#[endpoint {
    method = POST,
    path = "/product",
    tags = ["printer"],
}]
pub async fn product(rqctx: RequestContext<Arc<Context>>, body: UntypedBody) -> EnvelopeResult {
    let ctx = rqctx.context();
    let request: AuthRequest = match ctx.decode(body.as_bytes()) {
        Ok(request) => request,
        Err(envelope) => return respond(envelope),
    };

    let state = ctx.state.lock().await;
    if let Err(envelope) = authorized(&state, &request.credentials) {
        return respond(envelope);
    }
    respond(handlers::product(&state))
}

/** Report the full printer status. */
#[endpoint {
    method = POST,
    path = "/detail",
    tags = ["printer"],
}]
pub async fn detail(rqctx: RequestContext<Arc<Context>>, body: UntypedBody) -> EnvelopeResult {
    let ctx = rqctx.context();
    let request: AuthRequest = match ctx.decode(body.as_bytes()) {
        Ok(request) => request,
        Err(envelope) => return respond(envelope),
    };

    let state = ctx.state.lock().await;
    if let Err(envelope) = authorized(&state, &request.credentials) {
        return respond(envelope);
    }
    respond(handlers::detail(&state))
}

/** Run a control command. */
#[endpoint {
    method = POST,
    path = "/control",
    tags = ["printer"],
}]
pub async fn control(rqctx: RequestContext<Arc<Context>>, body: UntypedBody) -> EnvelopeResult {
    let ctx = rqctx.context();
    let request: ControlRequest = match ctx.decode(body.as_bytes()) {
        Ok(request) => request,
        Err(envelope) => return respond(envelope),
    };

    let mut state = ctx.state.lock().await;
    if let Err(envelope) = authorized(&state, &request.credentials) {
        return respond(envelope);
    }

    tracing::info!(cmd = %request.payload.cmd, args = %request.payload.args, "control command");
    match ControlCommand::from_payload(&request.payload) {
        Ok(command) => respond(handlers::control(&mut state, command)),
        Err(err) => respond(Envelope::rejected(err.to_string())),
    }
}

/** List recently stored files. */
#[endpoint {
    method = POST,
    path = "/gcodeList",
    tags = ["files"],
}]
pub async fn gcode_list(rqctx: RequestContext<Arc<Context>>, body: UntypedBody) -> EnvelopeResult {
    let ctx = rqctx.context();
    let request: AuthRequest = match ctx.decode(body.as_bytes()) {
        Ok(request) => request,
        Err(envelope) => return respond(envelope),
    };

    let state = ctx.state.lock().await;
    if let Err(envelope) = authorized(&state, &request.credentials) {
        return respond(envelope);
    }
    respond(handlers::gcode_list(&state))
}

/** Fetch a file's thumbnail. */
#[endpoint {
    method = POST,
    path = "/gcodeThumb",
    tags = ["files"],
}]
pub async fn gcode_thumb(rqctx: RequestContext<Arc<Context>>, body: UntypedBody) -> EnvelopeResult {
    let ctx = rqctx.context();
    let request: FileRequest = match ctx.decode(body.as_bytes()) {
        Ok(request) => request,
        Err(envelope) => return respond(envelope),
    };

    let state = ctx.state.lock().await;
    if let Err(envelope) = authorized(&state, &request.credentials) {
        return respond(envelope);
    }
    respond(handlers::gcode_thumb(&state, &request))
}

/** Start printing a stored file. */
#[endpoint {
    method = POST,
    path = "/printGcode",
    tags = ["files"],
}]
pub async fn print_gcode(rqctx: RequestContext<Arc<Context>>, body: UntypedBody) -> EnvelopeResult {
    let ctx = rqctx.context();
    let request: PrintRequest = match ctx.decode(body.as_bytes()) {
        Ok(request) => request,
        Err(envelope) => return respond(envelope),
    };

    let mut state = ctx.state.lock().await;
    if let Err(envelope) = authorized(&state, &request.credentials) {
        return respond(envelope);
    }
    tracing::info!(
        file = ?request.file_name,
        leveling = request.leveling_before_print,
        "print requested"
    );
    respond(handlers::print_gcode(&mut state, &request))
}

/** Upload a file, optionally printing it straight away. */
#[endpoint {
    method = POST,
    path = "/uploadGcode",
    tags = ["files"],
}]
pub async fn upload_gcode(rqctx: RequestContext<Arc<Context>>, body: MultipartBody) -> EnvelopeResult {
    let ctx = rqctx.context();
    let headers = handlers::UploadHeaders::from_headers(rqctx.request.headers());

    {
        let state = ctx.state.lock().await;
        if let Err(envelope) = authorized(&state, &headers.credentials) {
            return respond(envelope);
        }
    }

    let mut multipart = body.content;
    let attachment = match parse_multipart_upload(&mut multipart).await {
        Ok(attachment) => attachment,
        Err(err) => {
            tracing::warn!(error = %err, "bad upload");
            return respond(err.into());
        }
    };

    let mut state = ctx.state.lock().await;
    respond(handlers::upload(
        &mut state,
        &headers,
        &attachment.file_name,
        attachment.content,
    ))
}

/// The uploaded file.
#[derive(Debug, Clone)]
pub struct FileAttachment {
    /// Name given by the client.
    pub file_name: String,
    /// File contents.
    pub content: Bytes,
}

/// Possible errors returned while reading an upload.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Some error occurred when processing the multipart upload.
    #[error(transparent)]
    Multer(#[from] multer::Error),

    /// Missing attachment.
    #[error("No file data received")]
    MissingFile,
}

impl From<Error> for Envelope {
    fn from(err: Error) -> Self {
        match err {
            Error::Multer(err) => Envelope::failure(Envelope::INTERNAL, err.to_string()),
            Error::MissingFile => Envelope::rejected(Error::MissingFile.to_string()),
        }
    }
}

/// Pull the `gcodeFile` part out of an upload.
#[tracing::instrument(skip_all)]
pub async fn parse_multipart_upload(multipart: &mut multer::Multipart<'_>) -> Result<FileAttachment, Error> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("gcodeFile") {
            continue;
        }

        let Some(file_name) = field.file_name().filter(|n| !n.is_empty()).map(str::to_string) else {
            return Err(Error::MissingFile);
        };
        let content = field.bytes().await?;
        if content.is_empty() {
            return Err(Error::MissingFile);
        }
        return Ok(FileAttachment { file_name, content });
    }

    Err(Error::MissingFile)
}
