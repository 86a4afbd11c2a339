pub mod campaigns;
pub mod courses;
pub mod departments;
pub mod employee_portal;
pub mod employees_admin;
pub mod phishing;
pub mod users;

use serde_json::{json, Value};

/// Standard success envelope
pub fn ok(data: Value) -> axum::Json<Value> {
    axum::Json(json!({ "success": true, "data": data }))
}

/// Success envelope carrying only a human-readable message
pub fn ok_message(message: &str) -> axum::Json<Value> {
    axum::Json(json!({ "success": true, "data": {}, "message": message }))
}

/// Pagination query params shared by the paginated list endpoints
#[derive(Debug, serde::Deserialize)]
pub struct Pagination {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl Pagination {
    pub fn limit_offset(&self) -> (i64, i64) {
        let per_page = self.per_page.unwrap_or(25).clamp(1, 100);
        let page = self.page.unwrap_or(1).max(1);
        (per_page, (page - 1) * per_page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults_and_clamps() {
        let p = Pagination { page: None, per_page: None };
        assert_eq!(p.limit_offset(), (25, 0));
        let p = Pagination { page: Some(3), per_page: Some(10) };
        assert_eq!(p.limit_offset(), (10, 20));
        let p = Pagination { page: Some(0), per_page: Some(1000) };
        assert_eq!(p.limit_offset(), (100, 0));
    }
}
