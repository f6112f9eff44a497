//! HTTP handlers and the URL table.

use crate::csv_import::import_file;
use crate::error::Result;
use crate::model::Person;
use crate::orm::{self, RequestConnection};
use crate::route;
use crate::router::{AppState, Request, Response, Router, access_log, start_timer};
use crate::template::{Context, TemplateValue};
use axum::body::Bytes;
use log::{info, warn};

/// Name of the multipart field carrying the uploaded file.
pub const FILE_FIELD: &str = "file";

/// Why an upload was turned away before import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadRejection {
    NoFilePart,
    /// Never produced: an upload with an empty filename is reported as
    /// `NoFilePart`, the same as a missing field.
    NoSelectedFile,
    InvalidFileType,
}

impl UploadRejection {
    pub fn message(&self) -> &'static str {
        match self {
            UploadRejection::NoFilePart => "No file part",
            UploadRejection::NoSelectedFile => "No selected file",
            UploadRejection::InvalidFileType => "Invalid file type",
        }
    }
}

/// Decide whether an upload named `file_name` may be imported.
pub fn classify_upload(file_name: Option<&str>) -> std::result::Result<(), UploadRejection> {
    match file_name {
        None | Some("") => Err(UploadRejection::NoFilePart),
        Some(name) if name.ends_with(".csv") => Ok(()),
        Some(_) => Err(UploadRejection::InvalidFileType),
    }
}

pub struct Upload {
    pub file_name: Option<String>,
    pub content: Bytes,
}

/// The first `file` field of a multipart body, if the body has one.
async fn find_upload(request: &mut Request) -> Result<Option<Upload>> {
    let Some(mut multipart) = request.multipart().await else {
        return Ok(None);
    };
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let content = field.bytes().await?;
        return Ok(Some(Upload { file_name, content }));
    }
    Ok(None)
}

async fn release(db: RequestConnection) {
    if let Err(e) = db.release().await {
        warn!("Closing request connection failed: {}", e);
    }
}

pub async fn index(_request: Request, state: AppState) -> Result<Response> {
    state.render("index.html", &Context::new())
}

pub async fn submit_file(mut request: Request, state: AppState) -> Result<Response> {
    let upload = find_upload(&mut request).await?;
    let rejection = match upload {
        None => UploadRejection::NoFilePart,
        Some(upload) => match classify_upload(upload.file_name.as_deref()) {
            Ok(()) => {
                let conn = request.db.get().await?;
                let written = import_file(&upload.content[..], conn).await?;
                info!(
                    "Imported {} people from {}",
                    written,
                    upload.file_name.unwrap_or_default()
                );
                release(request.db).await;
                return state.render("file_submitted.html", &Context::new());
            }
            Err(rejection) => rejection,
        },
    };

    warn!("Upload rejected: {}", rejection.message());
    let mut context = Context::new();
    context.insert("message".to_string(), rejection.message().into());
    state.render("file_not_submitted.html", &context)
}

pub async fn people(mut request: Request, state: AppState) -> Result<Response> {
    let conn = request.db.get().await?;
    orm::ensure_schema(conn).await?;
    let people = orm::fetch_all_people(conn).await?;
    release(request.db).await;

    let mut context = Context::new();
    context.insert("count".to_string(), TemplateValue::Number(people.len() as f64));
    context.insert(
        "people".to_string(),
        people.iter().collect::<Vec<&Person>>().into(),
    );
    state.render("people.html", &context)
}

pub fn urls() -> Router {
    let mut router = Router::new();
    router.add_middleware(start_timer());
    router.add_post_middleware(access_log());
    route!(router,
        GET "/" => { index },
        POST "/submit_file" => { submit_file },
        GET "/people" => { people },
    );
    router
}
