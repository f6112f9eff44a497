use axum::body::Body;
use axum::http::{Request, StatusCode};
use people_upload::router::AppState;
use people_upload::settings::Settings;
use people_upload::views::{self, UploadRejection, classify_upload};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "----people-upload-boundary";

const TWO_PEOPLE: &str = "name,date_of_birth,weight,male\n\
                          Alice,1990-01-01,70.0,False\n\
                          Bob,1985-05-15,75.0,True\n";

/// A fresh app backed by a database file inside a temporary directory.
fn app() -> (axum::Router, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        database: dir.path().join("people.db"),
        ..Settings::default()
    };
    (views::urls().into_axum(AppState::new(settings)), dir)
}

fn upload(field: &str, filename: &str, content: &str) -> Request<Body> {
    let body = format!(
        "--{b}\r\n\
         Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
         Content-Type: text/csv\r\n\
         \r\n\
         {content}\r\n\
         --{b}--\r\n",
        b = BOUNDARY,
    );
    Request::builder()
        .method("POST")
        .uri("/submit_file")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[test]
fn test_classify_upload() {
    assert_eq!(classify_upload(None), Err(UploadRejection::NoFilePart));
    // An empty filename is reported like a missing field
    assert_eq!(classify_upload(Some("")), Err(UploadRejection::NoFilePart));
    assert_eq!(
        classify_upload(Some("people.txt")),
        Err(UploadRejection::InvalidFileType)
    );
    assert_eq!(
        classify_upload(Some("people.CSV")),
        Err(UploadRejection::InvalidFileType)
    );
    assert_eq!(classify_upload(Some("people.csv")), Ok(()));
}

#[test]
fn test_rejection_messages() {
    assert_eq!(UploadRejection::NoFilePart.message(), "No file part");
    assert_eq!(UploadRejection::NoSelectedFile.message(), "No selected file");
    assert_eq!(UploadRejection::InvalidFileType.message(), "Invalid file type");
}

#[tokio::test]
async fn test_index_route() {
    let (app, _dir) = app();
    let (status, body) = send(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Upload Your File"));
}

#[tokio::test]
async fn test_submit_file_no_file() {
    let (app, _dir) = app();
    let request = Request::builder()
        .method("POST")
        .uri("/submit_file")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("No file part"));
}

#[tokio::test]
async fn test_submit_file_other_field_only() {
    let (app, _dir) = app();
    let (status, body) = send(&app, upload("attachment", "people.csv", TWO_PEOPLE)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("No file part"));
}

#[tokio::test]
async fn test_submit_file_no_selected_file() {
    let (app, _dir) = app();
    let (status, body) = send(&app, upload("file", "", "")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("No file part"));
}

#[tokio::test]
async fn test_submit_file_invalid_file_type() {
    let (app, _dir) = app();
    let (status, body) = send(&app, upload("file", "test.txt", "some content")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Invalid file type"));
}

#[tokio::test]
async fn test_people_empty_on_fresh_database() {
    let (app, _dir) = app();
    let (status, body) = send(&app, get("/people")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("No people yet."));
}

#[tokio::test]
async fn test_upload_then_list_people() {
    let (app, _dir) = app();

    let (status, body) = send(&app, upload("file", "people.csv", TWO_PEOPLE)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("File submitted successfully"));

    let (status, body) = send(&app, get("/people")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("People (2)"));
    assert!(body.contains("<td>Alice</td>"));
    assert!(body.contains("<td>1990-01-01</td>"));
    assert!(body.contains("<td>Bob</td>"));
    assert!(body.contains("<td>75</td>"));
}

#[tokio::test]
async fn test_reupload_updates_in_place() {
    let (app, _dir) = app();
    send(&app, upload("file", "people.csv", TWO_PEOPLE)).await;

    let changed = "name,date_of_birth,weight,male\nAlice,1990-01-01,64.5,False\n";
    let (status, _) = send(&app, upload("file", "changed.csv", changed)).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, get("/people")).await;
    assert!(body.contains("People (2)"));
    assert_eq!(body.matches("<td>Alice</td>").count(), 1);
    assert!(body.contains("<td>64.5</td>"));
    assert!(!body.contains("<td>70</td>"));
}

#[tokio::test]
async fn test_upload_above_default_multipart_cap() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        database: dir.path().join("people.db"),
        upload_limit: 8 * 1024 * 1024,
        ..Settings::default()
    };
    let app = views::urls().into_axum(AppState::new(settings));

    // About 3 MiB, past axum's 2 MiB multipart default
    let notes = "x".repeat(1000);
    let mut csv = String::from("name,date_of_birth,weight,male,notes\n");
    for i in 0..3200 {
        csv.push_str(&format!("Person {},1990-01-01,70.0,False,{}\n", i, notes));
    }
    assert!(csv.len() > 3 * 1024 * 1024);

    let (status, body) = send(&app, upload("file", "big.csv", &csv)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("File submitted successfully"));

    let (_, body) = send(&app, get("/people")).await;
    assert!(body.contains("People (3200)"));
}

#[tokio::test]
async fn test_upload_over_configured_limit_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        database: dir.path().join("people.db"),
        upload_limit: 1024,
        ..Settings::default()
    };
    let app = views::urls().into_axum(AppState::new(settings));

    let csv = format!(
        "name,date_of_birth,weight,male\n{}",
        "Alice,1990-01-01,70.0,False\n".repeat(100)
    );
    let (status, _) = send(&app, upload("file", "people.csv", &csv)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_missing_column_is_a_server_error_and_inserts_nothing() {
    let (app, _dir) = app();
    let bad = "name,date_of_birth,weight\nAlice,1990-01-01,70.0\n";

    let (status, _) = send(&app, upload("file", "bad.csv", bad)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let (_, body) = send(&app, get("/people")).await;
    assert!(body.contains("No people yet."));
}

#[tokio::test]
async fn test_names_are_escaped_in_listing() {
    let (app, _dir) = app();
    let csv = "name,date_of_birth,weight,male\n<script>,1990-01-01,70.0,False\n";
    send(&app, upload("file", "people.csv", csv)).await;

    let (_, body) = send(&app, get("/people")).await;
    assert!(body.contains("<td>&lt;script&gt;</td>"));
    assert!(!body.contains("<td><script></td>"));
}

#[tokio::test]
async fn test_unknown_path_and_wrong_method() {
    let (app, _dir) = app();
    let (status, _) = send(&app, get("/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get("/submit_file")).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}
