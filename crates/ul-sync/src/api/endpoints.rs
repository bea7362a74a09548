//! API endpoint URL builders

/// Session login
pub fn login_url(base_url: &str) -> String {
    format!("{}/api/user/login", trim(base_url))
}

/// Single product create (POST) and update (PUT)
pub fn product_url(base_url: &str) -> String {
    format!("{}/api/product", trim(base_url))
}

/// Product listing; filters go in the query string
pub fn products_url(base_url: &str) -> String {
    format!("{}/api/products", trim(base_url))
}

fn trim(base_url: &str) -> &str {
    base_url.trim_end_matches('/')
}
