//! Mutations of a blob's JSON data addressed by pointer tokens.

use serde_json::{Map, Value};

use crate::delta::{Delta, DeltaType};

/// How an incoming delta's value is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteMode {
  /// The delta's own type decides.
  Plain,
  /// Objects are deep-merged into the existing value.
  Merge,
}

pub(crate) fn get<'a>(data: &'a Value, tokens: &[String]) -> Option<&'a Value> {
  tokens.iter().try_fold(data, |current, token| match current {
    Value::Object(map) => map.get(token),
    Value::Array(items) => token.parse::<usize>().ok().and_then(|i| items.get(i)),
    _ => None,
  })
}

fn parent_mut<'a>(data: &'a mut Value, tokens: &[String], create: bool) -> Result<&'a mut Value, String> {
  let mut current = data;
  for token in tokens {
    if current.is_null() && create {
      *current = Value::Object(Map::new());
    }
    current = match current {
      Value::Object(map) => {
        if create {
          map.entry(token.clone()).or_insert(Value::Null)
        } else {
          map.get_mut(token).ok_or_else(|| format!("no value at '{}'", token))?
        }
      }
      Value::Array(items) => {
        let index = token
          .parse::<usize>()
          .map_err(|_| format!("'{}' is not an array index", token))?;
        items
          .get_mut(index)
          .ok_or_else(|| format!("index {} out of bounds", index))?
      }
      other => return Err(format!("cannot descend into {} at '{}'", kind(other), token)),
    };
  }
  Ok(current)
}

fn kind(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "a boolean",
    Value::Number(_) => "a number",
    Value::String(_) => "a string",
    Value::Array(_) => "an array",
    Value::Object(_) => "an object",
  }
}

/// Set `value` at `tokens`, creating intermediate objects.
pub(crate) fn set(data: &mut Value, tokens: &[String], value: Value) -> Result<(), String> {
  let Some((last, parents)) = tokens.split_last() else {
    *data = value;
    return Ok(());
  };

  let parent = parent_mut(data, parents, true)?;
  if parent.is_null() {
    *parent = Value::Object(Map::new());
  }
  match parent {
    Value::Object(map) => {
      map.insert(last.clone(), value);
      Ok(())
    }
    Value::Array(items) => {
      if last == "-" {
        items.push(value);
        return Ok(());
      }
      let index = last
        .parse::<usize>()
        .map_err(|_| format!("'{}' is not an array index", last))?;
      match index.cmp(&items.len()) {
        std::cmp::Ordering::Less => items[index] = value,
        std::cmp::Ordering::Equal => items.push(value),
        std::cmp::Ordering::Greater => return Err(format!("index {} out of bounds", index)),
      }
      Ok(())
    }
    other => Err(format!("cannot set '{}' inside {}", last, kind(other))),
  }
}

/// Remove and return the value at `tokens`.
pub(crate) fn remove(data: &mut Value, tokens: &[String]) -> Result<Value, String> {
  let Some((last, parents)) = tokens.split_last() else {
    if data.is_null() {
      return Err("blob has no data".to_string());
    }
    return Ok(data.take());
  };

  match parent_mut(data, parents, false)? {
    Value::Object(map) => map
      .remove(last)
      .ok_or_else(|| format!("no value at '{}'", last)),
    Value::Array(items) => {
      let index = last
        .parse::<usize>()
        .map_err(|_| format!("'{}' is not an array index", last))?;
      if index < items.len() {
        Ok(items.remove(index))
      } else {
        Err(format!("index {} out of bounds", index))
      }
    }
    other => Err(format!("cannot remove '{}' from {}", last, kind(other))),
  }
}

/// Recursively merge `patch` into `target`. Non-object values replace.
pub(crate) fn deep_merge(target: &mut Value, patch: Value) {
  match (target, patch) {
    (Value::Object(existing), Value::Object(incoming)) => {
      for (key, value) in incoming {
        match existing.get_mut(&key) {
          Some(slot) => deep_merge(slot, value),
          None => {
            existing.insert(key, value);
          }
        }
      }
    }
    (target, patch) => *target = patch,
  }
}

/// How to put a path back the way it was before a delta touched it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Undo {
  /// Concrete location: `-` is resolved to the index the value landed at.
  tokens: Vec<String>,
  action: UndoAction,
}

#[derive(Debug, Clone, PartialEq)]
enum UndoAction {
  /// Write the old value back in place.
  Restore(Value),
  /// Nothing was there: remove what the delta created.
  Remove,
  /// An array element was removed: insert it back at its index.
  Insert(Value),
}

/// Record what `tokens` holds now, before a write or removal.
///
/// A write to a missing path undoes at the first missing ancestor, and one
/// through a `null` restores that `null`, so intermediate objects created
/// on the way are removed too.
fn capture(data: &Value, tokens: &[String], removing: bool) -> Undo {
  let mut current = data;
  let mut resolved = Vec::with_capacity(tokens.len());

  for token in tokens {
    if current.is_null() {
      return Undo {
        tokens: resolved,
        action: UndoAction::Restore(Value::Null),
      };
    }
    let next = match current {
      Value::Object(map) => {
        resolved.push(token.clone());
        map.get(token)
      }
      Value::Array(items) => {
        let index = if token == "-" {
          items.len()
        } else {
          token.parse::<usize>().unwrap_or(usize::MAX)
        };
        resolved.push(index.to_string());
        items.get(index)
      }
      _ => {
        resolved.push(token.clone());
        None
      }
    };
    match next {
      Some(value) => current = value,
      None => {
        return Undo {
          tokens: resolved,
          action: UndoAction::Remove,
        };
      }
    }
  }

  let in_array = tokens
    .split_last()
    .is_some_and(|(_, parents)| get(data, parents).is_some_and(Value::is_array));
  let action = if removing && in_array {
    UndoAction::Insert(current.clone())
  } else {
    UndoAction::Restore(current.clone())
  };
  Undo {
    tokens: resolved,
    action,
  }
}

/// Apply `delta` to `data`, returning how to undo it.
pub(crate) fn apply_mutation(data: &mut Value, delta: &Delta, mode: WriteMode) -> Result<Undo, String> {
  let tokens = delta.tokens();
  let undo = capture(data, &tokens, delta.delta_type == DeltaType::Delete);
  let prior = get(data, &tokens).filter(|v| !v.is_null()).cloned();
  let new_value = || {
    delta
      .new_value
      .clone()
      .ok_or_else(|| format!("{} delta carries no new value", delta.delta_type))
  };

  if mode == WriteMode::Merge && delta.delta_type != DeltaType::Delete {
    let incoming = new_value()?;
    match prior {
      Some(mut merged) => {
        deep_merge(&mut merged, incoming);
        set(data, &tokens, merged)?;
      }
      None => set(data, &tokens, incoming)?,
    }
    return Ok(undo);
  }

  match delta.delta_type {
    DeltaType::Create => {
      if prior.is_some() {
        return Err(format!("value already exists at '{}'", delta.path));
      }
      set(data, &tokens, new_value()?)?;
    }
    DeltaType::Update => set(data, &tokens, new_value()?)?,
    DeltaType::Delete => {
      remove(data, &tokens)?;
    }
    DeltaType::Transform => {
      let incoming = new_value()?;
      match (prior, incoming) {
        (Some(Value::Object(mut existing)), Value::Object(fields)) => {
          existing.extend(fields);
          set(data, &tokens, Value::Object(existing))?;
        }
        (_, incoming) => set(data, &tokens, incoming)?,
      }
    }
  }

  Ok(undo)
}

/// Put the data back the way it was before the delta `undo` was taken for.
pub(crate) fn compensate(data: &mut Value, undo: &Undo) -> Result<(), String> {
  let tokens = &undo.tokens;
  match &undo.action {
    UndoAction::Restore(prior) => set(data, tokens, prior.clone()),
    UndoAction::Remove => {
      if get(data, tokens).is_some() {
        remove(data, tokens)?;
      }
      Ok(())
    }
    UndoAction::Insert(prior) => {
      let Some((last, parents)) = tokens.split_last() else {
        return set(data, tokens, prior.clone());
      };
      match parent_mut(data, parents, false)? {
        Value::Array(items) => {
          let index = last
            .parse::<usize>()
            .map_err(|_| format!("'{}' is not an array index", last))?;
          if index > items.len() {
            return Err(format!("index {} out of bounds", index));
          }
          items.insert(index, prior.clone());
          Ok(())
        }
        other => Err(format!("cannot insert '{}' into {}", last, kind(other))),
      }
    }
  }
}
