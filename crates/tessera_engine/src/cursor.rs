//! Reflection cursor over a component value.
//!
//! A cursor walks a [`Value`] and its [`Type`] side by side. `push` enters
//! the members or elements of the current value, `pop` leaves them, and
//! `next`, `elem` and `member` move within the current scope. Lists expose
//! one extra slot past their end; writing there appends.

use tessera_foundation::{EntityId, Error, Result, Type, Value};

static ANY: Type = Type::Any;

/// A positioned view into a component value.
///
/// ```
/// use tessera_engine::Cursor;
/// use tessera_foundation::{Member, Type, Value};
///
/// let ty = Type::structure([Member::new("x", Type::Float), Member::new("y", Type::Float)]);
/// let mut value = ty.default_value();
/// let mut cursor = Cursor::new(&mut value, ty);
/// cursor.push().unwrap();
/// cursor.member("y").unwrap();
/// cursor.set_int(3).unwrap();
/// assert_eq!(cursor.get_float().unwrap(), 3.0);
/// ```
pub struct Cursor<'a> {
    root: &'a mut Value,
    ty: Type,
    path: Vec<usize>,
}

impl<'a> Cursor<'a> {
    /// Opens a cursor at the root of `value`.
    pub fn new(value: &'a mut Value, ty: Type) -> Self {
        Self {
            root: value,
            ty,
            path: Vec::new(),
        }
    }

    /// Number of scopes entered.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.path.len()
    }

    /// Position within the current scope, if inside one.
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        self.path.last().copied()
    }

    /// Declared type at the cursor (`Any` where the type is unknown).
    #[must_use]
    pub fn ty(&self) -> &Type {
        self.type_at(self.path.len())
    }

    fn type_at(&self, depth: usize) -> &Type {
        let mut ty = &self.ty;
        for &index in &self.path[..depth] {
            ty = unwrap_option(ty).child(index).unwrap_or(&ANY);
        }
        ty
    }

    fn value_at(&self, depth: usize) -> Result<&Value> {
        let mut value: &Value = self.root;
        for &index in &self.path[..depth] {
            let items = match value {
                Value::List(items) | Value::Struct(items) => items,
                other => {
                    return Err(Error::invalid_operation(format!(
                        "{} has no members",
                        other.kind_name()
                    )));
                }
            };
            value = items
                .get(index)
                .ok_or_else(|| Error::out_of_range(index, items.len()))?;
        }
        Ok(value)
    }

    /// Enters the members or elements of the current value.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` unless the current value is a struct or a
    /// list, `OutOfRange` on a list's append slot.
    pub fn push(&mut self) -> Result<()> {
        match self.get()? {
            Value::List(_) | Value::Struct(_) => {
                self.path.push(0);
                Ok(())
            }
            other => Err(Error::invalid_operation(format!(
                "cannot enter a {} value",
                other.kind_name()
            ))),
        }
    }

    /// Leaves the current scope.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` at the root.
    pub fn pop(&mut self) -> Result<()> {
        self.path
            .pop()
            .map(|_| ())
            .ok_or_else(|| Error::invalid_operation("cursor is already at the root"))
    }

    /// Moves to the next member or element.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` past the last member (or the append slot of a
    /// list) and `InvalidOperation` at the root.
    pub fn next(&mut self) -> Result<()> {
        let index = self
            .index()
            .ok_or_else(|| Error::invalid_operation("cursor is not inside a scope"))?;
        self.seek(index + 1)
    }

    /// Moves to element `index` of the current scope.
    ///
    /// # Errors
    ///
    /// As [`Cursor::next`].
    pub fn elem(&mut self, index: usize) -> Result<()> {
        if self.path.is_empty() {
            return Err(Error::invalid_operation("cursor is not inside a scope"));
        }
        self.seek(index)
    }

    /// Moves to the named member of the current struct scope.
    ///
    /// # Errors
    ///
    /// Returns `MemberNotFound` if the scope's type has no such member and
    /// `InvalidOperation` at the root.
    pub fn member(&mut self, name: &str) -> Result<()> {
        if self.path.is_empty() {
            return Err(Error::invalid_operation("cursor is not inside a scope"));
        }
        let scope = unwrap_option(self.type_at(self.path.len() - 1));
        let index = scope
            .member_index(name)
            .ok_or_else(|| Error::member_not_found(name, scope))?;
        self.seek(index)
    }

    fn seek(&mut self, index: usize) -> Result<()> {
        let depth = self.path.len() - 1;
        let bound = match (unwrap_option(self.type_at(depth)), self.value_at(depth)?) {
            (Type::Array(_, len), _) => *len,
            (_, Value::Struct(members)) => members.len(),
            (_, Value::List(items)) => items.len() + 1,
            (_, other) => {
                return Err(Error::invalid_operation(format!(
                    "{} has no members",
                    other.kind_name()
                )));
            }
        };
        if index >= bound {
            return Err(Error::out_of_range(index, bound));
        }
        self.path[depth] = index;
        Ok(())
    }

    /// The value at the cursor.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` on a list's append slot.
    pub fn get(&self) -> Result<&Value> {
        self.value_at(self.path.len())
    }

    /// Reads an int, converting from float.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` for non-numeric values.
    #[allow(clippy::cast_possible_truncation)]
    pub fn get_int(&self) -> Result<i64> {
        match self.get()? {
            Value::Int(n) => Ok(*n),
            Value::Float(f) => Ok(*f as i64),
            other => Err(Error::type_mismatch(&Type::Int, other)),
        }
    }

    /// Reads a float, converting from int.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` for non-numeric values.
    pub fn get_float(&self) -> Result<f64> {
        let value = self.get()?;
        value
            .as_number()
            .ok_or_else(|| Error::type_mismatch(&Type::Float, value))
    }

    /// Reads a bool.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` for other values.
    pub fn get_bool(&self) -> Result<bool> {
        match self.get()? {
            Value::Bool(b) => Ok(*b),
            other => Err(Error::type_mismatch(&Type::Bool, other)),
        }
    }

    /// Reads a string.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` for other values.
    pub fn get_str(&self) -> Result<&str> {
        let value = self.get()?;
        value
            .as_str()
            .ok_or_else(|| Error::type_mismatch(&Type::String, value))
    }

    /// Reads an entity reference.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` for other values.
    pub fn get_entity(&self) -> Result<EntityId> {
        let value = self.get()?;
        value
            .as_entity()
            .ok_or_else(|| Error::type_mismatch(&Type::Entity, value))
    }

    /// Writes a value, coerced to the declared type. On a list's append
    /// slot the list grows by one.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the type rejects the value.
    pub fn set_value(&mut self, value: Value) -> Result<()> {
        let value = self.ty().coerce(value)?;
        *self.resolve_mut()? = value;
        Ok(())
    }

    fn resolve_mut(&mut self) -> Result<&mut Value> {
        let mut fill = self.ty().default_value();
        let Self { root, path, .. } = self;
        let last = path.len();
        let mut value: &mut Value = root;
        for (depth, &index) in path.iter().enumerate() {
            let (items, growable) = match value {
                Value::List(items) => (items, true),
                Value::Struct(items) => (items, false),
                other => {
                    return Err(Error::invalid_operation(format!(
                        "{} has no members",
                        other.kind_name()
                    )));
                }
            };
            if growable && depth + 1 == last && index == items.len() {
                items.push_mut(std::mem::take(&mut fill));
            }
            let len = items.len();
            value = items
                .get_mut(index)
                .ok_or_else(|| Error::out_of_range(index, len))?;
        }
        Ok(value)
    }

    /// Writes an int. Float slots receive the converted value.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the slot is not numeric.
    pub fn set_int(&mut self, n: i64) -> Result<()> {
        self.set_value(Value::Int(n))
    }

    /// Writes a float. Int slots receive the truncated value.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the slot is not numeric.
    #[allow(clippy::cast_possible_truncation)]
    pub fn set_float(&mut self, f: f64) -> Result<()> {
        if matches!(unwrap_option(self.ty()), Type::Int) {
            self.set_value(Value::Int(f as i64))
        } else {
            self.set_value(Value::Float(f))
        }
    }

    /// Writes a bool.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the slot is not a bool.
    pub fn set_bool(&mut self, b: bool) -> Result<()> {
        self.set_value(Value::Bool(b))
    }

    /// Writes a string.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the slot is not a string.
    pub fn set_str(&mut self, s: &str) -> Result<()> {
        self.set_value(Value::from(s))
    }

    /// Writes an entity reference.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the slot is not an entity.
    pub fn set_entity(&mut self, entity: EntityId) -> Result<()> {
        self.set_value(Value::Entity(entity))
    }
}

fn unwrap_option(ty: &Type) -> &Type {
    match ty {
        Type::Option(inner) => unwrap_option(inner),
        other => other,
    }
}
