//! An in-memory Nyx instance for tests.
//!
//! Serves the portal API (`/api/portal/...`) and dataset content
//! (`/content/{name}`) from a wiremock server. One organisation is logged in
//! ([`ORG`]); datasets of other organisations are seeded by the test.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use futures::{executor::block_on, stream};
use multer::Multipart;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use wiremock::{matchers::any, Mock, MockServer, Request, Respond, ResponseTemplate};

pub const ORG: &str = "acme";
pub const USERNAME: &str = "alice";
pub const EMAIL: &str = "alice@acme.test";
pub const PASSWORD: &str = "secret";
pub const TOKEN: &str = "fake-access-token";

const CREATED: &str = "2024-06-01T12:00:00Z";
const UPDATED: &str = "2024-06-02T12:00:00Z";

type Record = Map<String, Value>;

#[derive(Default)]
struct State {
    base: String,
    community_mode: bool,
    products: Vec<Record>,
    content: HashMap<String, Vec<u8>>,
    subscriptions: HashSet<(String, String)>,
    circles: Vec<Record>,
    connections: Vec<Value>,
    organizations: Vec<Value>,
}

impl State {
    fn org(&self) -> String {
        if self.community_mode {
            format!("{ORG}/{USERNAME}")
        } else {
            ORG.to_string()
        }
    }

    fn product(&self, name: &str) -> Option<&Record> {
        self.products.iter().find(|p| field(p, "name") == Some(name))
    }

    fn is_subscribed(&self, product: &Record) -> bool {
        let key = (
            field(product, "creator").unwrap_or_default().to_string(),
            field(product, "name").unwrap_or_default().to_string(),
        );
        self.subscriptions.contains(&key)
    }
}

/// A running fake exchange. Dropping it stops the server.
pub struct FakeExchange {
    server: MockServer,
    state: Arc<Mutex<State>>,
}

impl FakeExchange {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let state = Arc::new(Mutex::new(State {
            base: server.uri(),
            connections: vec![
                json!({"id": "conn-1", "name": "uploads", "description": "bucket", "json_blob": {"bucket": "nyx"}, "allow_upload": true}),
                json!({"id": "conn-2", "name": "archive", "json_blob": {}, "allow_upload": false}),
            ],
            organizations: vec![json!({"did": "did:iotics:acme", "name": ORG})],
            ..Default::default()
        }));

        Mock::given(any())
            .respond_with(Exchange {
                state: state.clone(),
            })
            .mount(&server)
            .await;

        Self { server, state }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Switches the identity to `<org>/<username>`, as community instances do.
    pub fn set_community_mode(&self, enabled: bool) {
        self.lock().community_mode = enabled;
    }

    /// Adds a dataset published by `creator`, whose content is `content`.
    /// `record` holds any further wire fields (title, categories, ...).
    pub fn seed(&self, creator: &str, name: &str, record: Value, content: impl Into<Vec<u8>>) {
        let mut state = self.lock();
        let mut product = match record {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        product.insert("name".into(), json!(name));
        product.insert("creator".into(), json!(creator));
        product
            .entry("contentType")
            .or_insert_with(|| json!("text/plain"));
        product.insert(
            "accessURL".into(),
            json!(format!("{}/content/{name}", state.base)),
        );
        product.entry("created").or_insert_with(|| json!(CREATED));
        state.content.insert(name.to_string(), content.into());
        state.products.push(product);

        if !state
            .organizations
            .iter()
            .any(|o| o["name"] == json!(creator))
        {
            state.organizations.push(json!({
                "did": format!("did:iotics:{}", creator.replace('/', ":")),
                "name": creator,
            }));
        }
    }

    /// Names of the datasets the caller is subscribed to, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .subscriptions
            .iter()
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// The stored wire record of a dataset.
    pub fn product(&self, name: &str) -> Option<Value> {
        self.lock().product(name).cloned().map(Value::Object)
    }

    pub async fn received_requests(&self) -> Vec<Request> {
        self.server.received_requests().await.unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Exchange {
    state: Arc<Mutex<State>>,
}

impl Respond for Exchange {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let segments: Vec<String> = request
            .url
            .path_segments()
            .map(|s| s.map(decode).collect())
            .unwrap_or_default();
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
        let method = request.method.as_str();

        match segments.as_slice() {
            ["content", name] => return content(&state, request, name),
            ["api", "portal", "auth", "login"] if method == "POST" => return login(request),
            ["api", "portal", ..] => {}
            _ => return not_found("no such route"),
        }

        let authorized = request
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            == Some(format!("Bearer {TOKEN}").as_str());
        if !authorized {
            return error(401, "not authenticated");
        }

        match (method, &segments[2..]) {
            ("GET", ["users", "me"]) => ok(json!({"name": USERNAME, "email": EMAIL})),
            ("GET", ["auth", "qapi-connection"]) => ok(json!({
                "org_name": ORG,
                "community_mode": state.community_mode,
            })),
            ("GET", ["products"]) => list(&state, request, false),
            ("GET", ["meta", "search", "text"]) => list(&state, request, true),
            ("GET", ["products", name]) => {
                let org = state.org();
                match state.product(name) {
                    Some(p) if field(p, "creator") == Some(org.as_str()) => {
                        ok(Value::Object(p.clone()))
                    }
                    _ => not_found("product not found"),
                }
            }
            ("POST", ["products"]) => create_product(&mut state, request),
            ("PATCH", ["products", name]) => update_product(&mut state, request, name),
            ("DELETE", ["products", name]) => {
                let org = state.org();
                let before = state.products.len();
                state.products.retain(|p| {
                    field(p, "name") != Some(*name) || field(p, "creator") != Some(org.as_str())
                });
                if state.products.len() == before {
                    return not_found("product not found");
                }
                state.content.remove(*name);
                ResponseTemplate::new(200)
            }
            ("POST", ["purchases", "transactions"]) => purchase(&mut state, request),
            // The creator segment arrives double encoded.
            ("DELETE", ["purchases", "transactions", creator, name]) => {
                let key = (decode(creator), name.to_string());
                if state.subscriptions.remove(&key) {
                    ResponseTemplate::new(200)
                } else {
                    not_found("not subscribed")
                }
            }
            ("GET", ["meta", facet]) => facet_values(&state, facet),
            ("POST", ["meta", "sparql", _scope]) => {
                let mut csv = String::from("name\r\n");
                for p in &state.products {
                    csv.push_str(field(p, "name").unwrap_or_default());
                    csv.push_str("\r\n");
                }
                ResponseTemplate::new(200).set_body_raw(csv, "text/csv")
            }
            ("GET", ["organizations"]) => ok(Value::Array(state.organizations.clone())),
            ("GET", ["circles"]) => ok(Value::Array(
                state.circles.iter().cloned().map(Value::Object).collect(),
            )),
            ("GET", ["circles", name]) => match find_circle(&state, name) {
                Some(i) => ok(Value::Object(state.circles[i].clone())),
                None => not_found("circle not found"),
            },
            ("POST", ["circles"]) => create_circle(&mut state, request),
            ("PUT", ["circles", name]) => {
                let Some(i) = find_circle(&state, name) else {
                    return not_found("circle not found");
                };
                let Some(mut circle) = json_object(request) else {
                    return error(422, "invalid circle");
                };
                let did = state.circles[i].get("did").cloned().unwrap_or(Value::Null);
                circle.insert("did".into(), did);
                circle.insert("name".into(), json!(name));
                state.circles[i] = circle;
                ok(json!({}))
            }
            ("DELETE", ["circles", name]) => match find_circle(&state, name) {
                Some(i) => {
                    state.circles.remove(i);
                    ResponseTemplate::new(200)
                }
                None => not_found("circle not found"),
            },
            ("GET", ["connections"]) => {
                let allow = query(request, "allow_upload").map(|v| v == "true");
                let connections: Vec<Value> = state
                    .connections
                    .iter()
                    .filter(|c| allow.map_or(true, |a| c["allow_upload"] == json!(a)))
                    .cloned()
                    .collect();
                ok(Value::Array(connections))
            }
            _ => not_found("no such route"),
        }
    }
}

fn decode(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

fn field<'a>(record: &'a Record, key: &str) -> Option<&'a str> {
    record.get(key).and_then(Value::as_str)
}

fn query(request: &Request, key: &str) -> Option<String> {
    request
        .url
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

fn ok(body: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

fn error(status: u16, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(json!({"error": message}))
}

fn not_found(message: &str) -> ResponseTemplate {
    error(404, message)
}

fn json_object(request: &Request) -> Option<Record> {
    match serde_json::from_slice(&request.body).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

#[derive(Deserialize)]
struct Login {
    email: String,
    password: String,
}

fn login(request: &Request) -> ResponseTemplate {
    match serde_json::from_slice::<Login>(&request.body) {
        Ok(login) if login.email == EMAIL && login.password == PASSWORD => {
            ok(json!({"access_token": TOKEN, "refresh_token": "fake-refresh-token"}))
        }
        _ => error(401, "invalid credentials"),
    }
}

fn content(state: &State, request: &Request, name: &str) -> ResponseTemplate {
    if query(request, "buyer_org").is_none() {
        return error(400, "missing buyer_org");
    }
    let Some(product) = state.product(name) else {
        return not_found("product not found");
    };
    let own = field(product, "creator") == Some(state.org().as_str());
    if !own && !state.is_subscribed(product) {
        return error(403, "not subscribed");
    }
    let content_type = field(product, "contentType")
        .filter(|ct| !ct.contains("://"))
        .unwrap_or("application/octet-stream");
    let body = state.content.get(name).cloned().unwrap_or_default();
    ResponseTemplate::new(200).set_body_raw(body, content_type)
}

fn list(state: &State, request: &Request, text_search: bool) -> ResponseTemplate {
    let pairs: Vec<(String, String)> = request.url.query_pairs().into_owned().collect();
    let single = |key: &str| {
        pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    };
    let categories: Vec<&str> = pairs
        .iter()
        .filter(|(k, _)| k == "category")
        .map(|(_, v)| v.as_str())
        .collect();
    let text = if text_search {
        match single("text") {
            Some(text) => Some(text.to_lowercase()),
            None => return error(422, "text is required"),
        }
    } else {
        None
    };
    let org = state.org();

    let matches = |p: &Record| {
        let exact = |param: &str, key: &str| single(param).map_or(true, |v| field(p, key) == Some(v));
        let in_categories = categories.is_empty()
            || p.get("categories")
                .and_then(Value::as_array)
                .is_some_and(|cs| cs.iter().any(|c| c.as_str().is_some_and(|c| categories.contains(&c))));
        let in_text = text.as_ref().map_or(true, |t| {
            ["name", "title", "description"]
                .iter()
                .any(|k| field(p, k).is_some_and(|v| v.to_lowercase().contains(t.as_str())))
        });
        let included = match single("include") {
            Some("subscribed") => state.is_subscribed(p),
            Some("not-subscribed") => !state.is_subscribed(p),
            _ => true,
        };
        let in_scope = single("scope") != Some("local") || field(p, "creator") == Some(org.as_str());

        exact("name", "name")
            && exact("genre", "genre")
            && exact("creator", "creator")
            && exact("license", "licenseURL")
            && exact("contentType", "contentType")
            && in_categories
            && in_text
            && included
            && in_scope
    };

    ok(Value::Array(
        state
            .products
            .iter()
            .filter(|p| matches(p))
            .cloned()
            .map(Value::Object)
            .collect(),
    ))
}

fn facet_values(state: &State, facet: &str) -> ResponseTemplate {
    let key = match facet {
        "categories" => "categories",
        "genres" => "genre",
        "creators" => "creator",
        "contentTypes" => "contentType",
        "licenseURLs" => "licenseURL",
        _ => return not_found("no such facet"),
    };
    let mut values = BTreeSet::new();
    for p in &state.products {
        match p.get(key) {
            Some(Value::String(v)) if !v.is_empty() => {
                values.insert(v.clone());
            }
            Some(Value::Array(vs)) => {
                values.extend(vs.iter().filter_map(Value::as_str).map(String::from));
            }
            _ => {}
        }
    }
    ok(json!(values))
}

/// Named parts of a `multipart/form-data` body.
fn multipart_parts(request: &Request) -> Option<HashMap<String, Vec<u8>>> {
    let content_type = request.headers.get("content-type")?.to_str().ok()?;
    let boundary = multer::parse_boundary(content_type).ok()?;
    let body = Bytes::from(request.body.clone());
    let mut multipart = Multipart::new(
        stream::once(async move { Ok::<_, Infallible>(body) }),
        boundary,
    );

    // The whole body is already buffered, so every poll completes at once.
    block_on(async {
        let mut parts = HashMap::new();
        while let Some(field) = multipart.next_field().await.ok()? {
            let name = field.name()?.to_string();
            let bytes = field.bytes().await.ok()?;
            parts.insert(name, bytes.to_vec());
        }
        Some(parts)
    })
}

/// Metadata and optional file of a multipart product request.
fn product_form(request: &Request) -> Result<(Record, Option<Vec<u8>>), ResponseTemplate> {
    let mut parts = multipart_parts(request).ok_or_else(|| error(400, "expected multipart body"))?;
    let metadata = parts
        .remove("productMetadata")
        .ok_or_else(|| error(422, "productMetadata is required"))?;
    match serde_json::from_slice(&metadata) {
        Ok(Value::Object(map)) => Ok((map, parts.remove("productData"))),
        _ => Err(error(422, "productMetadata must be a JSON object")),
    }
}

fn check_visibility(record: &Record) -> Result<(), ResponseTemplate> {
    let non_empty = |key: &str| {
        record
            .get(key)
            .and_then(Value::as_array)
            .is_some_and(|v| !v.is_empty())
    };
    match (non_empty("accessControl"), non_empty("circles")) {
        (true, true) => Err(error(422, "accessControl and circles are exclusive")),
        (false, false) => Err(error(422, "either accessControl or circles is required")),
        _ => Ok(()),
    }
}

fn create_product(state: &mut State, request: &Request) -> ResponseTemplate {
    let (mut product, file) = match product_form(request) {
        Ok(form) => form,
        Err(response) => return response,
    };
    let Some(name) = field(&product, "name").map(String::from) else {
        return error(422, "name is required");
    };
    if let Err(response) = check_visibility(&product) {
        return response;
    }
    if file.is_none() && field(&product, "downloadURL").is_none() {
        return error(422, "either downloadURL or productData is required");
    }
    if state.product(&name).is_some() {
        return error(409, "product name already exists");
    }

    product.insert("creator".into(), json!(state.org()));
    product.insert(
        "accessURL".into(),
        json!(format!("{}/content/{name}", state.base)),
    );
    product.insert("created".into(), json!(CREATED));
    product.insert("updated".into(), json!(CREATED));
    state.content.insert(name, file.unwrap_or_default());
    state.products.push(product.clone());
    ok(Value::Object(product))
}

fn update_product(state: &mut State, request: &Request, name: &str) -> ResponseTemplate {
    let (changes, file) = match product_form(request) {
        Ok(form) => form,
        Err(response) => return response,
    };
    let org = state.org();
    let Some(product) = state
        .products
        .iter_mut()
        .find(|p| field(p, "name") == Some(name) && field(p, "creator") == Some(org.as_str()))
    else {
        return not_found("product not found");
    };

    let visibility_changed = changes.contains_key("accessControl") || changes.contains_key("circles");
    if visibility_changed {
        product.remove("accessControl");
        product.remove("circles");
    }
    for (key, value) in changes {
        if key != "name" {
            product.insert(key, value);
        }
    }
    product.insert("updated".into(), json!(UPDATED));
    let product = product.clone();
    if let Some(file) = file {
        state.content.insert(name.to_string(), file);
    }
    ok(Value::Object(product))
}

#[derive(Deserialize)]
struct Purchase {
    product_name: String,
    seller_org: String,
}

fn purchase(state: &mut State, request: &Request) -> ResponseTemplate {
    let Ok(purchase) = serde_json::from_slice::<Purchase>(&request.body) else {
        return error(422, "product_name and seller_org are required");
    };
    let exists = state.products.iter().any(|p| {
        field(p, "name") == Some(purchase.product_name.as_str())
            && field(p, "creator") == Some(purchase.seller_org.as_str())
    });
    if !exists {
        return not_found("product not found");
    }
    if !state
        .subscriptions
        .insert((purchase.seller_org, purchase.product_name))
    {
        return error(409, "already subscribed");
    }
    ok(json!({"status": "subscribed"}))
}

fn find_circle(state: &State, name: &str) -> Option<usize> {
    state
        .circles
        .iter()
        .position(|c| field(c, "name") == Some(name))
}

fn create_circle(state: &mut State, request: &Request) -> ResponseTemplate {
    let Some(mut circle) = json_object(request) else {
        return error(422, "invalid circle");
    };
    let Some(name) = field(&circle, "name").map(String::from) else {
        return error(422, "name is required");
    };
    if find_circle(state, &name).is_some() {
        return error(409, "circle already exists");
    }
    let did = format!("did:iotics:{}", uuid::Uuid::new_v4().simple());
    circle.insert("did".into(), json!(did));
    state.circles.push(circle);
    ok(json!({"did": did}))
}
