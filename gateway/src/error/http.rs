//! HTTP JSON API errors, mapped to `actix_web::error::ResponseError`.

#[derive(Debug)]
pub enum HttpApiError {
    NotImplemented,
}

impl std::fmt::Display for HttpApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotImplemented => write!(f, "not implemented"),
        }
    }
}

impl actix_web::error::ResponseError for HttpApiError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        match self {
            Self::NotImplemented => actix_web::http::StatusCode::NOT_IMPLEMENTED,
        }
    }

    fn error_response(&self) -> actix_web::HttpResponse<actix_web::body::BoxBody> {
        actix_web::HttpResponse::build(self.status_code())
            .content_type(actix_web::http::header::ContentType::plaintext())
            .body(self.to_string())
    }
}
