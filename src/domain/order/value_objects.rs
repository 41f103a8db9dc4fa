use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Order Value Objects
// ============================================================================

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(OrderId);
id_type!(UserId);
id_type!(EmployeeId);
id_type!(AddressId);
id_type!(DishId);
id_type!(SetmealId);

/// Client-visible order number, derived from the placement timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(pub String);

impl OrderNumber {
    /// Refund numbers are derived from the order number so that re-issuing a
    /// refund for the same order is idempotent at the gateway.
    pub fn refund_number(&self) -> String {
        format!("R{}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Issues order numbers of the form `<unix millis><4-digit sequence>`.
///
/// Numbers are strictly increasing within one process. Collisions between
/// processes surface as a unique violation in the store and are retried.
#[derive(Debug, Default)]
pub struct OrderNumberGenerator {
    last: AtomicU64,
}

impl OrderNumberGenerator {
    const SEQ_SPACE: u64 = 10_000;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, now: DateTime<Utc>) -> OrderNumber {
        let floor = now.timestamp_millis().max(0) as u64 * Self::SEQ_SPACE;
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(floor.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        OrderNumber(floor.max(previous + 1).to_string())
    }
}

/// Amount in the smallest currency unit (fen/cents).
pub type Amount = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    PendingPayment,
    ToBeConfirmed,
    Confirmed,
    DeliveryInProgress,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::PendingPayment,
        OrderStatus::ToBeConfirmed,
        OrderStatus::Confirmed,
        OrderStatus::DeliveryInProgress,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];

    /// Persisted representation.
    pub fn code(self) -> i16 {
        match self {
            OrderStatus::PendingPayment => 1,
            OrderStatus::ToBeConfirmed => 2,
            OrderStatus::Confirmed => 3,
            OrderStatus::DeliveryInProgress => 4,
            OrderStatus::Completed => 5,
            OrderStatus::Cancelled => 6,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderStatus::PendingPayment => "PENDING_PAYMENT",
            OrderStatus::ToBeConfirmed => "TO_BE_CONFIRMED",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::DeliveryInProgress => "DELIVERY_IN_PROGRESS",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayStatus {
    Unpaid,
    Paid,
    Refunded,
}

impl PayStatus {
    pub fn code(self) -> i16 {
        match self {
            PayStatus::Unpaid => 0,
            PayStatus::Paid => 1,
            PayStatus::Refunded => 2,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(PayStatus::Unpaid),
            1 => Some(PayStatus::Paid),
            2 => Some(PayStatus::Refunded),
            _ => None,
        }
    }
}

/// Who performed an operation. Threaded explicitly through every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
    User(UserId),
    Operator(EmployeeId),
    System,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::User(id) => write!(f, "user:{}", id),
            Actor::Operator(id) => write!(f, "operator:{}", id),
            Actor::System => f.write_str("system"),
        }
    }
}

impl FromStr for Actor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "system" {
            return Ok(Actor::System);
        }
        let (kind, id) = s.split_once(':').ok_or_else(|| format!("malformed actor: {s}"))?;
        let id: i64 = id.parse().map_err(|_| format!("malformed actor id: {s}"))?;
        match kind {
            "user" => Ok(Actor::User(UserId(id))),
            "operator" => Ok(Actor::Operator(EmployeeId(id))),
            _ => Err(format!("unknown actor kind: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Insert,
    Update,
}

/// Audit stamp applied by the store layer on every write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stamp {
    pub kind: OperationKind,
    pub at: DateTime<Utc>,
    pub by: Actor,
}

impl Stamp {
    pub fn insert(by: Actor, at: DateTime<Utc>) -> Self {
        Self { kind: OperationKind::Insert, at, by }
    }

    pub fn update(by: Actor, at: DateTime<Utc>) -> Self {
        Self { kind: OperationKind::Update, at, by }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Audit {
    pub created_at: DateTime<Utc>,
    pub created_by: Actor,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Actor,
}

impl Audit {
    pub fn stamped(stamp: Stamp) -> Self {
        Self {
            created_at: stamp.at,
            created_by: stamp.by,
            updated_at: stamp.at,
            updated_by: stamp.by,
        }
    }

    pub fn apply(&mut self, stamp: Stamp) {
        if stamp.kind == OperationKind::Insert {
            self.created_at = stamp.at;
            self.created_by = stamp.by;
        }
        self.updated_at = stamp.at;
        self.updated_by = stamp.by;
    }
}

/// A saved address from the user's address book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub id: AddressId,
    pub user_id: UserId,
    pub consignee: String,
    pub phone: String,
    pub province: String,
    pub city: String,
    pub district: String,
    pub detail: String,
    pub label: Option<String>,
}

/// Address fields frozen into the order at submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressSnapshot {
    pub province: String,
    pub city: String,
    pub district: String,
    pub detail: String,
    pub label: Option<String>,
}

impl From<&Address> for AddressSnapshot {
    fn from(a: &Address) -> Self {
        Self {
            province: a.province.clone(),
            city: a.city.clone(),
            district: a.district.clone(),
            detail: a.detail.clone(),
            label: a.label.clone(),
        }
    }
}

impl fmt::Display for AddressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(label) = &self.label {
            write!(f, "[{}]", label)?;
        }
        write!(f, "{}{}{}{}", self.province, self.city, self.district, self.detail)
    }
}

/// What a cart entry or order line refers to in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CatalogItem {
    Dish(DishId),
    Setmeal(SetmealId),
}

/// Composite identity of a cart entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CartKey {
    pub user_id: UserId,
    pub item: CatalogItem,
    pub flavor: Option<String>,
}

/// Catalog data frozen at the time the item is put in the cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub name: String,
    pub image: Option<String>,
    pub price: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartEntry {
    pub key: CartKey,
    pub snapshot: ItemSnapshot,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
}

impl CartEntry {
    pub fn subtotal(&self) -> Amount {
        self.snapshot.price * self.quantity as Amount
    }
}

/// One frozen item of a placed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: i64,
    pub order_id: OrderId,
    pub item: CatalogItem,
    pub flavor: Option<String>,
    pub name: String,
    pub image: Option<String>,
    pub price: Amount,
    pub quantity: i32,
}

/// An order line before the store has assigned identities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrderLine {
    pub item: CatalogItem,
    pub flavor: Option<String>,
    pub name: String,
    pub image: Option<String>,
    pub price: Amount,
    pub quantity: i32,
}

impl From<&CartEntry> for NewOrderLine {
    fn from(entry: &CartEntry) -> Self {
        Self {
            item: entry.key.item,
            flavor: entry.key.flavor.clone(),
            name: entry.snapshot.name.clone(),
            image: entry.snapshot.image.clone(),
            price: entry.snapshot.price,
            quantity: entry.quantity,
        }
    }
}

impl OrderLine {
    pub fn to_cart_entry(&self, user_id: UserId, now: DateTime<Utc>) -> CartEntry {
        CartEntry {
            key: CartKey {
                user_id,
                item: self.item,
                flavor: self.flavor.clone(),
            },
            snapshot: ItemSnapshot {
                name: self.name.clone(),
                image: self.image.clone(),
                price: self.price,
            },
            quantity: self.quantity,
            created_at: now,
        }
    }
}

/// Which path a cancellation came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelKind {
    Rejected,
    Cancelled,
}

/// A cancellation waiting on its refund. Persisted with the order so that a
/// later reconciliation pass can finish it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundClaim {
    pub requested_at: DateTime<Utc>,
    pub kind: CancelKind,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub size: u32,
}

impl Page {
    pub fn new(number: u32, size: u32) -> Self {
        Self { number: number.max(1), size: size.clamp(1, 100) }
    }

    pub fn offset(&self) -> i64 {
        (self.number as i64 - 1) * self.size as i64
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PageResult<T> {
    pub total: i64,
    pub records: Vec<T>,
}

/// Filter for order listings. Empty fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct OrderQuery {
    pub user_id: Option<UserId>,
    pub status: Option<OrderStatus>,
    pub number: Option<String>,
    pub phone: Option<String>,
    pub placed_from: Option<DateTime<Utc>>,
    pub placed_to: Option<DateTime<Utc>>,
}

// ============================================================================
// Unit Tests
// ============================================================================
