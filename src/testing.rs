//! In-memory stand-ins for the storefront API and client storage.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Value as JsonValue, json};
use tokio::sync::oneshot;

use crate::api::{ApiClient, ApiRequest, ApiResponse, FormPart, Method, Transport};
use crate::error::Error;
use crate::models::{CartKey, CartLine, PaymentMethods, Product, UserProfile};
use crate::session::{Session, SessionStore};
use crate::storage::{ClientStorage, MemoryStorage};
use crate::types::{BearerToken, ProductId, Role, UserId};

pub(crate) const TEST_ORIGIN: &str = "http://127.0.0.1:8000";

pub(crate) fn profile(id: i64, role: Role) -> UserProfile {
    UserProfile {
        id: UserId(id),
        name: format!("user{id}"),
        email: format!("user{id}@tienda.cl"),
        role: Some(role),
        payment_methods: PaymentMethods::default(),
    }
}

pub(crate) fn session_with_role(role: Role) -> Session {
    Session {
        user_id: UserId(1),
        role: role.clone(),
        token: BearerToken::new("t"),
        profile: profile(1, role),
    }
}

pub(crate) fn product(id: i64, price: f64) -> Product {
    Product {
        id: ProductId(id),
        name: format!("producto {id}"),
        description: None,
        price,
        stock: None,
        categoria_id: None,
        images: Vec::new(),
    }
}

pub(crate) fn line(product_id: i64, quantity: u32, color: &str, size: &str) -> CartLine {
    CartLine {
        product_id: ProductId(product_id),
        quantity,
        color: color.into(),
        size: size.into(),
        product: None,
    }
}

pub(crate) fn api_with(fake: FakeTransport) -> (ApiClient<FakeTransport>, FakeTransport) {
    let sessions = Arc::new(SessionStore::new(Arc::new(MemoryStorage::new())));
    let origin = TEST_ORIGIN.parse().expect("valid test origin");
    (ApiClient::new(fake.clone(), sessions, origin), fake)
}

pub(crate) fn signed_in<T: Transport>(api: &ApiClient<T>, id: i64) {
    signed_in_as(api, id, Role::Usuario);
}

pub(crate) fn signed_in_as<T: Transport>(api: &ApiClient<T>, id: i64, role: Role) {
    api.sessions()
        .establish_session(profile(id, role), BearerToken::new(format!("token-{id}")))
        .expect("memory storage never fails");
}

enum Script {
    Respond(ApiResponse),
    Fail(Error),
    Later(oneshot::Receiver<ApiResponse>),
}

type Hook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Backend {
    carts: HashMap<UserId, Vec<CartLine>>,
    favorites: HashMap<UserId, Vec<ProductId>>,
    users: Vec<(UserProfile, String)>,
    products: Vec<Product>,
    payment_status: Option<String>,
}

#[derive(Default)]
struct Inner {
    requests: Vec<ApiRequest>,
    scripts: VecDeque<Script>,
    hook: Option<Hook>,
    backend: Backend,
}

/// Scripted transport backed by a tiny emulation of the storefront API.
///
/// Queued scripts answer requests in order; once the queue is empty the
/// emulated backend answers. Every request is recorded.
#[derive(Clone, Default)]
pub(crate) struct FakeTransport {
    inner: Arc<Mutex<Inner>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.inner.lock().requests.clone()
    }

    pub(crate) fn respond_next(&self, response: ApiResponse) {
        self.inner.lock().scripts.push_back(Script::Respond(response));
    }

    pub(crate) fn fail_next(&self, error: Error) {
        self.inner.lock().scripts.push_back(Script::Fail(error));
    }

    /// The next request waits until a response is sent on the returned handle.
    pub(crate) fn respond_later(&self) -> oneshot::Sender<ApiResponse> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().scripts.push_back(Script::Later(rx));
        tx
    }

    /// Run `hook` once, while the next request is in flight.
    pub(crate) fn on_send(&self, hook: impl FnOnce() + Send + 'static) {
        self.inner.lock().hook = Some(Box::new(hook));
    }

    pub(crate) fn seed_cart(&self, user: UserId, lines: Vec<CartLine>) {
        self.inner.lock().backend.carts.insert(user, lines);
    }

    pub(crate) fn cart_of(&self, user: UserId) -> Vec<CartLine> {
        self.inner
            .lock()
            .backend
            .carts
            .get(&user)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn seed_favorites(&self, user: UserId, ids: Vec<ProductId>) {
        self.inner.lock().backend.favorites.insert(user, ids);
    }

    pub(crate) fn favorites_of(&self, user: UserId) -> Vec<ProductId> {
        self.inner
            .lock()
            .backend
            .favorites
            .get(&user)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn add_user(&self, profile: UserProfile, password: &str) {
        self.inner
            .lock()
            .backend
            .users
            .push((profile, password.to_owned()));
    }

    pub(crate) fn users(&self) -> Vec<UserProfile> {
        self.inner
            .lock()
            .backend
            .users
            .iter()
            .map(|(u, _)| u.clone())
            .collect()
    }

    pub(crate) fn add_product(&self, product: Product) {
        self.inner.lock().backend.products.push(product);
    }

    pub(crate) fn set_payment_status(&self, status: &str) {
        self.inner.lock().backend.payment_status = Some(status.to_owned());
    }
}

impl Transport for FakeTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, Error> {
        let (script, hook) = {
            let mut inner = self.inner.lock();
            inner.requests.push(request.clone());
            (inner.scripts.pop_front(), inner.hook.take())
        };
        if let Some(hook) = hook {
            hook();
        }
        match script {
            Some(Script::Respond(response)) => Ok(response),
            Some(Script::Fail(error)) => Err(error),
            Some(Script::Later(rx)) => rx
                .await
                .map_err(|_| Error::Network("scripted response dropped".into())),
            None => Ok(self.inner.lock().backend.handle(&request)),
        }
    }
}

const DUPLICATE_EMAIL: &str =
    "duplicate key value violates unique constraint \"usuarios_correo_key\"";

fn not_found(detail: &str) -> ApiResponse {
    ApiResponse::new(404, json!({ "detail": detail }))
}

fn bad_request(detail: &str) -> ApiResponse {
    ApiResponse::new(400, json!({ "detail": detail }))
}

impl Backend {
    fn handle(&mut self, req: &ApiRequest) -> ApiResponse {
        let segments: Vec<&str> = req
            .path
            .trim_start_matches("/api/")
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        let body = req.body.clone().unwrap_or(JsonValue::Null);

        match (req.method, segments.as_slice()) {
            (Method::Post, ["auth", "login"]) => self.login(&body),
            (Method::Get, ["usuarios"]) => ApiResponse::ok(json!(self.users())),
            (Method::Post, ["usuarios"]) => self.create_user(&body),
            (Method::Get, ["usuarios", id]) => match self.user(id) {
                Some(u) => ApiResponse::ok(json!(u)),
                None => not_found("Usuario no encontrado"),
            },
            (Method::Put, ["usuarios", id]) => self.update_user(id, &body),
            (Method::Delete, ["usuarios", id]) => {
                let before = self.users.len();
                self.users.retain(|(u, _)| u.id.to_string() != *id);
                if before == self.users.len() {
                    not_found("Usuario no encontrado")
                } else {
                    ApiResponse::ok(json!({"message": "Usuario eliminado"}))
                }
            }
            (Method::Put, ["usuarios", id, "finalizar-orden"]) => match id.parse() {
                Ok(id) => {
                    self.carts.remove(&UserId(id));
                    ApiResponse::ok(json!({"message": "Orden finalizada"}))
                }
                Err(_) => not_found("Usuario no encontrado"),
            },
            (Method::Get, ["carrito", user]) => match user.parse() {
                Ok(id) => ApiResponse::ok(
                    json!({"carrito": self.carts.get(&UserId(id)).cloned().unwrap_or_default()}),
                ),
                Err(_) => not_found("Usuario no encontrado"),
            },
            (method, ["carrito", action, product]) => {
                self.cart_mutation(method, action, product, &body)
            }
            (Method::Get, ["favorites", user]) => match user.parse() {
                Ok(id) => {
                    let ids = self.favorites.get(&UserId(id)).cloned().unwrap_or_default();
                    ApiResponse::ok(json!({ "favorites": ids }))
                }
                Err(_) => not_found("Usuario no encontrado"),
            },
            (Method::Post | Method::Delete, ["favorites", product]) => {
                self.favorite_mutation(req.method, product, &body)
            }
            (Method::Get, ["productos"]) => ApiResponse::ok(json!({
                "products": self.products,
                "total": self.products.len(),
            })),
            (Method::Post, ["productos"]) => self.create_product(req),
            (Method::Get, ["productos", id]) => {
                match self.products.iter().find(|p| p.id.to_string() == *id) {
                    Some(product) => ApiResponse::ok(json!(product)),
                    None => not_found("Producto no encontrado"),
                }
            }
            (Method::Put, ["productos", id]) => self.update_product(id, &body),
            (Method::Delete, ["productos", id]) => {
                match self.products.iter().position(|p| p.id.to_string() == *id) {
                    Some(i) => ApiResponse::ok(json!(self.products.remove(i))),
                    None => not_found("Producto no encontrado"),
                }
            }
            (Method::Get, ["categorias"]) => ApiResponse::ok(json!([])),
            (Method::Post, ["pagos", "webpay", "confirm"]) => ApiResponse::ok(json!({
                "status": self.payment_status.clone().unwrap_or_else(|| "AUTHORIZED".into())
            })),
            _ => not_found("Not Found"),
        }
    }

    fn users(&self) -> Vec<UserProfile> {
        self.users.iter().map(|(u, _)| u.clone()).collect()
    }

    fn user(&self, id: &str) -> Option<UserProfile> {
        self.users
            .iter()
            .find(|(u, _)| u.id.to_string() == id)
            .map(|(u, _)| u.clone())
    }

    fn login(&self, body: &JsonValue) -> ApiResponse {
        let password = body["contraseña"].as_str().unwrap_or_default();
        let found = self.users.iter().find(|(u, p)| {
            p == password
                && (body["correo"].as_str() == Some(u.email.as_str())
                    || body["nombre"].as_str() == Some(u.name.as_str()))
        });
        match found {
            Some((user, _)) => ApiResponse::ok(json!({
                "access_token": format!("token-{}", user.id),
                "token_type": "bearer",
                "user": user,
            })),
            None => ApiResponse::new(401, json!({"detail": "Credenciales incorrectas"})),
        }
    }

    fn create_user(&mut self, body: &JsonValue) -> ApiResponse {
        let email = body["correo"].as_str().unwrap_or_default().to_owned();
        if self.users.iter().any(|(u, _)| u.email == email) {
            return ApiResponse::new(
                400,
                json!({ "detail": DUPLICATE_EMAIL }),
            );
        }
        let next_id = self.users.iter().map(|(u, _)| u.id.0).max().unwrap_or(0) + 1;
        let profile = UserProfile {
            id: UserId(next_id),
            name: body["nombre"].as_str().unwrap_or_default().to_owned(),
            email,
            role: body["rol"].as_str().map(Role::from),
            payment_methods: serde_json::from_value(body["metodo_pago"].clone())
                .unwrap_or_default(),
        };
        let password = body["contraseña"].as_str().unwrap_or_default().to_owned();
        self.users.push((profile.clone(), password));
        ApiResponse::ok(json!(profile))
    }

    fn update_user(&mut self, id: &str, body: &JsonValue) -> ApiResponse {
        let Some((user, password)) = self.users.iter_mut().find(|(u, _)| u.id.to_string() == id)
        else {
            return not_found("Usuario no encontrado");
        };
        if let Some(name) = body["nombre"].as_str() {
            user.name = name.to_owned();
        }
        if let Some(email) = body["correo"].as_str() {
            user.email = email.to_owned();
        }
        if let Some(role) = body["rol"].as_str() {
            user.role = Some(Role::from(role));
        }
        if let Some(new_password) = body["contraseña"].as_str() {
            *password = new_password.to_owned();
        }
        ApiResponse::ok(json!(user))
    }

    fn create_product(&mut self, req: &ApiRequest) -> ApiResponse {
        let field = |name: &str| req.form_value(name).unwrap_or_default();
        let (Ok(price), Ok(stock), Ok(categoria_id)) = (
            field("precio").parse::<f64>(),
            field("cantidad").parse::<i64>(),
            field("categoria_id").parse::<i64>(),
        ) else {
            return ApiResponse::new(422, json!({"detail": "Error en los datos de entrada"}));
        };
        let image = req.form.iter().flatten().find_map(|part| match part {
            FormPart::File { file_name, .. } => Some(format!("/uploads/{file_name}")),
            FormPart::Text { .. } => None,
        });
        let next_id = self.products.iter().map(|p| p.id.0).max().unwrap_or(0) + 1;
        let product = Product {
            id: ProductId(next_id),
            name: field("nombre").to_owned(),
            description: Some(field("descripcion").to_owned()).filter(|d| !d.is_empty()),
            price,
            stock: Some(stock),
            categoria_id: Some(categoria_id),
            images: image.into_iter().collect(),
        };
        self.products.push(product.clone());
        ApiResponse::ok(json!(product))
    }

    fn update_product(&mut self, id: &str, body: &JsonValue) -> ApiResponse {
        let Some(product) = self.products.iter_mut().find(|p| p.id.to_string() == id) else {
            return not_found("Producto no encontrado");
        };
        product.name = body["nombre"].as_str().unwrap_or_default().to_owned();
        product.description = body["descripcion"].as_str().map(str::to_owned);
        product.price = body["precio"].as_f64().unwrap_or_default();
        product.stock = body["cantidad"].as_i64();
        product.categoria_id = body["categoria_id"].as_i64();
        if let Some(image) = body["image_url"].as_str() {
            product.images = vec![image.to_owned()];
        }
        ApiResponse::ok(json!(product))
    }

    fn cart_mutation(
        &mut self,
        method: Method,
        action: &str,
        product: &str,
        body: &JsonValue,
    ) -> ApiResponse {
        let Ok(product_id) = product.parse::<i64>().map(ProductId) else {
            return not_found("Producto no encontrado");
        };
        let item = &body["cart_item"];
        let Some(user_id) = item["user_id"].as_i64().map(UserId) else {
            return ApiResponse::new(422, json!({"detail": "user_id requerido"}));
        };
        let color = item["color"].as_str().unwrap_or_default().to_owned();
        let size = item["talla"].as_str().unwrap_or_default().to_owned();
        let quantity = item["cantidad"].as_u64().map_or(1, |q| q as u32);
        let key = CartKey::new(product_id, color, size);
        let cart = self.carts.entry(user_id).or_default();
        let existing = cart.iter().position(|l| l.matches(&key));

        match (method, action, existing) {
            (Method::Post, "agregar", Some(i)) => cart[i].quantity += quantity,
            (Method::Post, "agregar", None) => cart.push(CartLine {
                product_id,
                quantity,
                color: key.color,
                size: key.size,
                product: None,
            }),
            (Method::Put, "actualizar", Some(i)) => cart[i].quantity = quantity,
            (Method::Put, "actualizar", None) => {
                return not_found("Producto no encontrado en el carrito");
            }
            (Method::Delete, "eliminar", _) => cart.retain(|l| !l.matches(&key)),
            _ => return not_found("Not Found"),
        }
        ApiResponse::ok(json!({ "message": "Carrito actualizado", "carrito": cart }))
    }

    fn favorite_mutation(
        &mut self,
        method: Method,
        product: &str,
        body: &JsonValue,
    ) -> ApiResponse {
        let Ok(product_id) = product.parse::<i64>().map(ProductId) else {
            return not_found("Producto no encontrado");
        };
        let Some(user_id) = body["user_id"].as_i64().map(UserId) else {
            return ApiResponse::new(422, json!({"detail": "user_id requerido"}));
        };
        let favorites = self.favorites.entry(user_id).or_default();
        let present = favorites.contains(&product_id);
        match method {
            Method::Post if present => bad_request("Producto ya está en favoritos"),
            Method::Post => {
                favorites.push(product_id);
                ApiResponse::ok(json!({
                    "message": "Producto agregado a favoritos",
                    "favorites": favorites,
                }))
            }
            Method::Delete if !present => bad_request("Producto no está en favoritos"),
            _ => {
                favorites.retain(|id| *id != product_id);
                ApiResponse::ok(json!({
                    "message": "Producto eliminado de favoritos",
                    "favorites": favorites,
                }))
            }
        }
    }
}

/// Storage that fails writes to selected keys.
#[derive(Default)]
pub(crate) struct FlakyStorage {
    inner: MemoryStorage,
    failing: Mutex<HashSet<String>>,
}

impl FlakyStorage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing_on(key: &str) -> Self {
        let storage = Self::new();
        storage.fail_on(key);
        storage
    }

    pub(crate) fn fail_on(&self, key: &str) {
        self.failing.lock().insert(key.to_owned());
    }
}

impl ClientStorage for FlakyStorage {
    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        if self.failing.lock().contains(key) {
            return Err(Error::Storage(format!("quota exceeded writing {key}")));
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        self.inner.remove(key)
    }
}
