//! Structured query and bulk mutation descriptions.
//!
//! # Responsibility
//! - Carry what to read (entity, predicates, sort, window, strategy hints) or
//!   what to change in bulk, as plain values.
//!
//! # Invariants
//! - Every predicate binds exactly one parameter; `In` carries its list as one
//!   operand.
//! - Descriptions are inert; field names are validated by the builder.

use crate::model::entity::Entity;
use crate::model::schema::EntitySchema;
use rusqlite::types::Value;

/// Conversion into a bound SQLite value.
pub trait ToValue {
    fn to_value(&self) -> Value;
}

impl ToValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl ToValue for &str {
    fn to_value(&self) -> Value {
        Value::Text((*self).to_string())
    }
}

impl ToValue for String {
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }
}

impl ToValue for &String {
    fn to_value(&self) -> Value {
        Value::Text((*self).clone())
    }
}

impl ToValue for i64 {
    fn to_value(&self) -> Value {
        Value::Integer(*self)
    }
}

impl ToValue for i32 {
    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }
}

impl ToValue for u32 {
    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }
}

impl ToValue for bool {
    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }
}

impl ToValue for f64 {
    fn to_value(&self) -> Value {
        Value::Real(*self)
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, ToValue::to_value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
    In,
}

impl Operator {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Like => "LIKE",
            Self::In => "IN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Single(Value),
    List(Vec<Value>),
}

/// One `field operator value` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    field: String,
    op: Operator,
    operand: Operand,
}

impl Predicate {
    pub fn new(field: impl Into<String>, op: Operator, value: impl ToValue) -> Self {
        let value = value.to_value();
        let operand = if op == Operator::In {
            Operand::List(vec![value])
        } else {
            Operand::Single(value)
        };
        Self {
            field: field.into(),
            op,
            operand,
        }
    }

    pub fn any_of<V: ToValue>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self {
            field: field.into(),
            op: Operator::In,
            operand: Operand::List(values.into_iter().map(|value| value.to_value()).collect()),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn op(&self) -> Operator {
        self.op
    }

    pub fn operand(&self) -> &Operand {
        &self.operand
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub field: String,
    pub direction: Direction,
}

/// Ordered list of sort keys.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sort {
    orders: Vec<Order>,
}

impl Sort {
    pub fn by(direction: Direction, field: impl Into<String>) -> Self {
        Self::default().and(direction, field)
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self::by(Direction::Asc, field)
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self::by(Direction::Desc, field)
    }

    pub fn and(mut self, direction: Direction, field: impl Into<String>) -> Self {
        self.orders.push(Order {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn is_unsorted(&self) -> bool {
        self.orders.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    #[default]
    None,
    /// Exclusive lock held until the transaction ends.
    PessimisticWrite,
}

/// What to read from one entity.
#[derive(Debug, Clone)]
pub struct QueryDescription {
    pub(crate) entity: &'static EntitySchema,
    pub(crate) predicates: Vec<Predicate>,
    pub(crate) sort: Option<Sort>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) fetch_joins: Vec<String>,
    pub(crate) lock: LockMode,
    pub(crate) read_only: bool,
}

impl QueryDescription {
    pub fn new(entity: &'static EntitySchema) -> Self {
        Self {
            entity,
            predicates: Vec::new(),
            sort: None,
            limit: None,
            offset: None,
            fetch_joins: Vec::new(),
            lock: LockMode::None,
            read_only: false,
        }
    }

    pub fn of<E: Entity>() -> Self {
        Self::new(E::schema())
    }

    pub fn filter(mut self, field: impl Into<String>, op: Operator, value: impl ToValue) -> Self {
        self.predicates.push(Predicate::new(field, op, value));
        self
    }

    pub fn where_eq(self, field: impl Into<String>, value: impl ToValue) -> Self {
        self.filter(field, Operator::Eq, value)
    }

    pub fn filter_in<V: ToValue>(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.predicates.push(Predicate::any_of(field, values));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        let sort = self.sort.take().unwrap_or_default();
        self.sort = Some(sort.and(direction, field));
        self
    }

    pub fn sorted(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Loads `relation` in the same statement instead of lazily.
    pub fn fetch_join(mut self, relation: impl Into<String>) -> Self {
        let relation = relation.into();
        if !self.fetch_joins.contains(&relation) {
            self.fetch_joins.push(relation);
        }
        self
    }

    pub fn lock(mut self, mode: LockMode) -> Self {
        self.lock = mode;
        self
    }

    /// Marks loaded entities read-only; `save` will not write them back.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn entity(&self) -> &'static EntitySchema {
        self.entity
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn sort(&self) -> Option<&Sort> {
        self.sort.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    Set { field: String, value: Value },
    /// `field = field + by`
    Increment { field: String, by: Value },
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationKind {
    Update(Vec<Assignment>),
    Delete,
}

/// Set-based UPDATE/DELETE over every row matching the predicates.
#[derive(Debug, Clone)]
pub struct BulkMutation {
    pub(crate) entity: &'static EntitySchema,
    pub(crate) kind: MutationKind,
    pub(crate) predicates: Vec<Predicate>,
}

impl BulkMutation {
    pub fn update(entity: &'static EntitySchema) -> Self {
        Self {
            entity,
            kind: MutationKind::Update(Vec::new()),
            predicates: Vec::new(),
        }
    }

    pub fn delete(entity: &'static EntitySchema) -> Self {
        Self {
            entity,
            kind: MutationKind::Delete,
            predicates: Vec::new(),
        }
    }

    pub fn set(self, field: impl Into<String>, value: impl ToValue) -> Self {
        self.assign(Assignment::Set {
            field: field.into(),
            value: value.to_value(),
        })
    }

    pub fn increment(self, field: impl Into<String>, by: impl ToValue) -> Self {
        self.assign(Assignment::Increment {
            field: field.into(),
            by: by.to_value(),
        })
    }

    pub fn filter(mut self, field: impl Into<String>, op: Operator, value: impl ToValue) -> Self {
        self.predicates.push(Predicate::new(field, op, value));
        self
    }

    pub fn where_eq(self, field: impl Into<String>, value: impl ToValue) -> Self {
        self.filter(field, Operator::Eq, value)
    }

    pub fn filter_in<V: ToValue>(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.predicates.push(Predicate::any_of(field, values));
        self
    }

    pub fn entity(&self) -> &'static EntitySchema {
        self.entity
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    fn assign(mut self, assignment: Assignment) -> Self {
        match &mut self.kind {
            MutationKind::Update(assignments) => assignments.push(assignment),
            // Assignments are meaningless for DELETE; keep the description inert.
            MutationKind::Delete => {}
        }
        self
    }
}
