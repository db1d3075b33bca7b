use crate::entities;
use crate::errors::TeahouseError;
use crate::settings::Database as DbCfg;
use base64ct::Encoding;
use chrono::Utc;
use rand::RngCore;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, Database, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub is_active: bool,
    pub is_admin: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Full-replace update for a user's own account. Identity (id) and privilege
/// flags are deliberately not part of this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserUpdate {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Admin variant of [`UserUpdate`] that may also toggle account flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminUserUpdate {
    pub username: String,
    pub email: String,
    pub password: String,
    pub is_active: bool,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tea {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    #[serde(rename = "type")]
    pub kind: String,
    pub weight: f64,
    pub in_stock: bool,
}

/// Catalog item payload, used for create and for full-replace update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTea {
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    #[serde(rename = "type")]
    pub kind: String,
    pub weight: f64,
    #[serde(default = "default_in_stock")]
    pub in_stock: bool,
}

fn default_in_stock() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i32,
    pub user_id: i32,
    pub created_at: i64,
    pub status: String,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: i32,
    pub tea_id: i32,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub status: Option<String>,
    #[serde(default)]
    pub items: Vec<NewOrderItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub tea_id: i32,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub user_id: i32,
    pub created_at: i64,
    pub expires_at: i64,
}

pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, TeahouseError> {
    let db = Database::connect(&cfg.url).await?;
    Ok(db)
}

fn random_id() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}

fn hash_password(password: &str) -> Result<String, TeahouseError> {
    use argon2::password_hash::{rand_core::OsRng, SaltString};
    use argon2::{Argon2, PasswordHasher};

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| TeahouseError::Other(format!("Password hashing failed: {}", e)))
}

fn user_from_model(model: entities::user::Model) -> User {
    User {
        id: model.id,
        username: model.username,
        email: model.email,
        is_active: model.is_active,
        is_admin: model.is_admin,
        created_at: model.created_at,
    }
}

fn tea_from_model(model: entities::tea::Model) -> Tea {
    Tea {
        id: model.id,
        name: model.name,
        description: model.description,
        price: model.price,
        kind: model.kind,
        weight: model.weight,
        in_stock: model.in_stock,
    }
}

fn order_from_model(model: entities::order::Model, items: Vec<OrderItem>) -> Order {
    Order {
        id: model.id,
        user_id: model.user_id,
        created_at: model.created_at,
        status: model.status,
        items,
    }
}

// Tea catalog

pub async fn list_teas(
    db: &DatabaseConnection,
    skip: u64,
    limit: u64,
) -> Result<Vec<Tea>, TeahouseError> {
    use entities::tea::{Column, Entity};

    let rows = Entity::find()
        .order_by_asc(Column::Id)
        .offset(skip)
        .limit(limit)
        .all(db)
        .await?;

    Ok(rows.into_iter().map(tea_from_model).collect())
}

pub async fn get_tea(db: &DatabaseConnection, tea_id: i32) -> Result<Option<Tea>, TeahouseError> {
    use entities::tea::Entity;

    Ok(Entity::find_by_id(tea_id).one(db).await?.map(tea_from_model))
}

pub async fn create_tea(db: &DatabaseConnection, input: NewTea) -> Result<Tea, TeahouseError> {
    let tea = entities::tea::ActiveModel {
        id: Default::default(),
        name: Set(input.name),
        description: Set(input.description),
        price: Set(input.price),
        kind: Set(input.kind),
        weight: Set(input.weight),
        in_stock: Set(input.in_stock),
    };

    let model = tea.insert(db).await?;
    Ok(tea_from_model(model))
}

/// Full replace: every catalog field is overwritten with the request value.
pub async fn update_tea(
    db: &DatabaseConnection,
    tea_id: i32,
    input: NewTea,
) -> Result<Option<Tea>, TeahouseError> {
    use entities::tea::Entity;

    let Some(model) = Entity::find_by_id(tea_id).one(db).await? else {
        return Ok(None);
    };

    let mut active: entities::tea::ActiveModel = model.into();
    active.name = Set(input.name);
    active.description = Set(input.description);
    active.price = Set(input.price);
    active.kind = Set(input.kind);
    active.weight = Set(input.weight);
    active.in_stock = Set(input.in_stock);

    let model = active.update(db).await?;
    Ok(Some(tea_from_model(model)))
}

pub async fn delete_tea(
    db: &DatabaseConnection,
    tea_id: i32,
) -> Result<Option<Tea>, TeahouseError> {
    use entities::tea::Entity;

    let Some(model) = Entity::find_by_id(tea_id).one(db).await? else {
        return Ok(None);
    };

    Entity::delete_by_id(tea_id).exec(db).await?;
    Ok(Some(tea_from_model(model)))
}

// User accounts

pub async fn list_users(
    db: &DatabaseConnection,
    skip: u64,
    limit: u64,
) -> Result<Vec<User>, TeahouseError> {
    use entities::user::{Column, Entity};

    let rows = Entity::find()
        .order_by_asc(Column::Id)
        .offset(skip)
        .limit(limit)
        .all(db)
        .await?;

    Ok(rows.into_iter().map(user_from_model).collect())
}

pub async fn get_user(db: &DatabaseConnection, user_id: i32) -> Result<Option<User>, TeahouseError> {
    use entities::user::Entity;

    Ok(Entity::find_by_id(user_id)
        .one(db)
        .await?
        .map(user_from_model))
}

pub async fn get_user_by_email(
    db: &DatabaseConnection,
    email: &str,
) -> Result<Option<User>, TeahouseError> {
    use entities::user::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::Email.eq(email))
        .one(db)
        .await?
        .map(user_from_model))
}

pub async fn create_user(db: &DatabaseConnection, input: NewUser) -> Result<User, TeahouseError> {
    use entities::user::{Column, Entity};

    if Entity::find()
        .filter(Column::Email.eq(&input.email))
        .one(db)
        .await?
        .is_some()
    {
        return Err(TeahouseError::Conflict("Email already registered".into()));
    }
    if Entity::find()
        .filter(Column::Username.eq(&input.username))
        .one(db)
        .await?
        .is_some()
    {
        return Err(TeahouseError::Conflict("Username already taken".into()));
    }

    let hashed_password = hash_password(&input.password)?;
    let created_at = Utc::now().timestamp();

    let user = entities::user::ActiveModel {
        id: Default::default(),
        username: Set(input.username),
        email: Set(input.email),
        hashed_password: Set(hashed_password),
        is_active: Set(true),
        is_admin: Set(false),
        created_at: Set(created_at),
    };

    let model = user.insert(db).await?;
    Ok(user_from_model(model))
}

pub async fn update_user(
    db: &DatabaseConnection,
    user_id: i32,
    input: UserUpdate,
) -> Result<Option<User>, TeahouseError> {
    use entities::user::Entity;

    let Some(model) = Entity::find_by_id(user_id).one(db).await? else {
        return Ok(None);
    };

    let mut active: entities::user::ActiveModel = model.into();
    active.username = Set(input.username);
    active.email = Set(input.email);
    active.hashed_password = Set(hash_password(&input.password)?);

    let model = active.update(db).await?;
    Ok(Some(user_from_model(model)))
}

pub async fn admin_update_user(
    db: &DatabaseConnection,
    user_id: i32,
    input: AdminUserUpdate,
) -> Result<Option<User>, TeahouseError> {
    use entities::user::Entity;

    let Some(model) = Entity::find_by_id(user_id).one(db).await? else {
        return Ok(None);
    };

    let mut active: entities::user::ActiveModel = model.into();
    active.username = Set(input.username);
    active.email = Set(input.email);
    active.hashed_password = Set(hash_password(&input.password)?);
    active.is_active = Set(input.is_active);
    active.is_admin = Set(input.is_admin);

    let model = active.update(db).await?;
    Ok(Some(user_from_model(model)))
}

pub async fn set_admin(
    db: &DatabaseConnection,
    user_id: i32,
    is_admin: bool,
) -> Result<Option<User>, TeahouseError> {
    use entities::user::Entity;

    let Some(model) = Entity::find_by_id(user_id).one(db).await? else {
        return Ok(None);
    };

    let mut active: entities::user::ActiveModel = model.into();
    active.is_admin = Set(is_admin);

    let model = active.update(db).await?;
    Ok(Some(user_from_model(model)))
}

pub async fn delete_user(
    db: &DatabaseConnection,
    user_id: i32,
) -> Result<Option<User>, TeahouseError> {
    use entities::user::Entity;

    let Some(model) = Entity::find_by_id(user_id).one(db).await? else {
        return Ok(None);
    };

    Entity::delete_by_id(user_id).exec(db).await?;
    Ok(Some(user_from_model(model)))
}

/// Look up a user by email and verify the password against the stored hash.
/// Returns None for unknown email, disabled account, or wrong password; the
/// caller must not reveal which one it was.
pub async fn verify_user_password(
    db: &DatabaseConnection,
    email: &str,
    password: &str,
) -> Result<Option<User>, TeahouseError> {
    use argon2::{Argon2, PasswordHash, PasswordVerifier};
    use entities::user::{Column, Entity};

    let model = match Entity::find().filter(Column::Email.eq(email)).one(db).await? {
        Some(m) if m.is_active => m,
        _ => return Ok(None),
    };

    let parsed_hash = PasswordHash::new(&model.hashed_password)
        .map_err(|e| TeahouseError::Other(format!("Invalid password hash: {}", e)))?;

    if Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
    {
        Ok(Some(user_from_model(model)))
    } else {
        Ok(None)
    }
}

// Bearer tokens

pub async fn issue_access_token(
    db: &DatabaseConnection,
    user_id: i32,
    ttl_secs: i64,
) -> Result<AccessToken, TeahouseError> {
    let token = random_id();
    let now = Utc::now().timestamp();
    let expires_at = now + ttl_secs;

    let access_token = entities::access_token::ActiveModel {
        token: Set(token.clone()),
        user_id: Set(user_id),
        created_at: Set(now),
        expires_at: Set(expires_at),
        revoked: Set(false),
    };

    access_token.insert(db).await?;

    Ok(AccessToken {
        token,
        user_id,
        created_at: now,
        expires_at,
    })
}

pub async fn resolve_access_token(
    db: &DatabaseConnection,
    token: &str,
) -> Result<Option<AccessToken>, TeahouseError> {
    use entities::access_token::{Column, Entity};

    if let Some(model) = Entity::find()
        .filter(Column::Token.eq(token))
        .one(db)
        .await?
    {
        let now = Utc::now().timestamp();
        if model.revoked || now > model.expires_at {
            return Ok(None);
        }

        Ok(Some(AccessToken {
            token: model.token,
            user_id: model.user_id,
            created_at: model.created_at,
            expires_at: model.expires_at,
        }))
    } else {
        Ok(None)
    }
}

pub async fn revoke_access_token(
    db: &DatabaseConnection,
    token: &str,
) -> Result<(), TeahouseError> {
    use entities::access_token::{Column, Entity};

    if let Some(model) = Entity::find()
        .filter(Column::Token.eq(token))
        .one(db)
        .await?
    {
        let mut active: entities::access_token::ActiveModel = model.into();
        active.revoked = Set(true);
        active.update(db).await?;
    }

    Ok(())
}

// Order workflow

/// Owner-or-admin predicate applied before every order read or mutation.
/// Callers turn a `false` into the same response as a missing order.
pub fn can_access(user: &User, order: &Order) -> bool {
    user.is_admin || order.user_id == user.id
}

/// Create an order header plus one line item per (tea, quantity) pair.
/// The header and all items commit in one transaction; an unknown tea id or
/// non-positive quantity rejects the whole order and leaves nothing behind.
pub async fn create_order(
    db: &DatabaseConnection,
    user_id: i32,
    input: NewOrder,
) -> Result<Order, TeahouseError> {
    for item in &input.items {
        if item.quantity < 1 {
            return Err(TeahouseError::BadRequest(format!(
                "quantity must be positive for tea {}",
                item.tea_id
            )));
        }
    }

    let status = input.status.unwrap_or_else(|| "pending".to_string());
    let now = Utc::now().timestamp();

    let txn = db.begin().await?;

    let header = entities::order::ActiveModel {
        id: Default::default(),
        user_id: Set(user_id),
        created_at: Set(now),
        status: Set(status),
    };
    let header = header.insert(&txn).await?;

    let mut items = Vec::with_capacity(input.items.len());
    for item in &input.items {
        if entities::tea::Entity::find_by_id(item.tea_id)
            .one(&txn)
            .await?
            .is_none()
        {
            txn.rollback().await?;
            return Err(TeahouseError::BadRequest(format!(
                "unknown tea id {}",
                item.tea_id
            )));
        }

        let row = entities::order_item::ActiveModel {
            id: Default::default(),
            order_id: Set(header.id),
            tea_id: Set(item.tea_id),
            quantity: Set(item.quantity),
        };
        let row = row.insert(&txn).await?;
        items.push(OrderItem {
            id: row.id,
            tea_id: row.tea_id,
            quantity: row.quantity,
        });
    }

    txn.commit().await?;

    Ok(order_from_model(header, items))
}

async fn load_order_items<C: ConnectionTrait>(
    db: &C,
    order_id: i32,
) -> Result<Vec<OrderItem>, TeahouseError> {
    use entities::order_item::{Column, Entity};

    let rows = Entity::find()
        .filter(Column::OrderId.eq(order_id))
        .order_by_asc(Column::Id)
        .all(db)
        .await?;

    Ok(rows
        .into_iter()
        .map(|m| OrderItem {
            id: m.id,
            tea_id: m.tea_id,
            quantity: m.quantity,
        })
        .collect())
}

pub async fn get_order(
    db: &DatabaseConnection,
    order_id: i32,
) -> Result<Option<Order>, TeahouseError> {
    use entities::order::Entity;

    let Some(model) = Entity::find_by_id(order_id).one(db).await? else {
        return Ok(None);
    };

    let items = load_order_items(db, model.id).await?;
    Ok(Some(order_from_model(model, items)))
}

pub async fn list_orders_for_user(
    db: &DatabaseConnection,
    user_id: i32,
    skip: u64,
    limit: u64,
) -> Result<Vec<Order>, TeahouseError> {
    use entities::order::{Column, Entity};

    let rows = Entity::find()
        .filter(Column::UserId.eq(user_id))
        .order_by_asc(Column::Id)
        .offset(skip)
        .limit(limit)
        .all(db)
        .await?;

    let mut orders = Vec::with_capacity(rows.len());
    for model in rows {
        let items = load_order_items(db, model.id).await?;
        orders.push(order_from_model(model, items));
    }
    Ok(orders)
}

/// Admin listing across all users.
pub async fn list_orders(
    db: &DatabaseConnection,
    skip: u64,
    limit: u64,
) -> Result<Vec<Order>, TeahouseError> {
    use entities::order::{Column, Entity};

    let rows = Entity::find()
        .order_by_asc(Column::Id)
        .offset(skip)
        .limit(limit)
        .all(db)
        .await?;

    let mut orders = Vec::with_capacity(rows.len());
    for model in rows {
        let items = load_order_items(db, model.id).await?;
        orders.push(order_from_model(model, items));
    }
    Ok(orders)
}

/// Only the status is mutable after creation; items and owner are not.
pub async fn update_order_status(
    db: &DatabaseConnection,
    order_id: i32,
    status: String,
) -> Result<Option<Order>, TeahouseError> {
    use entities::order::Entity;

    let Some(model) = Entity::find_by_id(order_id).one(db).await? else {
        return Ok(None);
    };

    let mut active: entities::order::ActiveModel = model.into();
    active.status = Set(status);
    let model = active.update(db).await?;

    let items = load_order_items(db, model.id).await?;
    Ok(Some(order_from_model(model, items)))
}

/// Remove the order and its line items. Items are deleted explicitly in the
/// same transaction; the schema cascade is a backstop for backends that
/// enforce foreign keys.
pub async fn delete_order(
    db: &DatabaseConnection,
    order_id: i32,
) -> Result<Option<Order>, TeahouseError> {
    use entities::order;
    use entities::order_item;

    let Some(model) = order::Entity::find_by_id(order_id).one(db).await? else {
        return Ok(None);
    };
    let items = load_order_items(db, model.id).await?;

    let txn = db.begin().await?;
    order_item::Entity::delete_many()
        .filter(order_item::Column::OrderId.eq(order_id))
        .exec(&txn)
        .await?;
    order::Entity::delete_by_id(order_id).exec(&txn).await?;
    txn.commit().await?;

    Ok(Some(order_from_model(model, items)))
}
