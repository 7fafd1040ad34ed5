use tracing::{debug, warn};

use super::action::Action;
use super::ast::{Call, Program};
use super::parser::parse_program;
use super::snapshot::{Entity, Snapshot};
use super::state::{Binding, Filtered, InterpreterState, Notice};
use super::value::{FunctionRef, Literal, Predicate, Value};
use super::{InterpreterError, Result};
use crate::theory::{NoteEvent, TheoryResult};

/// Collection operations every domain understands.
pub const BUILTINS: &[&str] = &["filter", "for_each", "map", "store"];

/// A domain's method table.
///
/// The engine owns statement sequencing, collections, and filtering; a
/// domain only interprets its own whitelisted calls against a [`Context`].
pub trait Domain: Send + Sync + 'static {
    /// Domain name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Whitelisted method names. Anything else is rejected as not-DSL.
    fn methods(&self) -> &'static [&'static str];

    /// Interpret one whitelisted call.
    fn apply(&self, cx: &mut Context<'_>, call: &Call) -> Result<()>;

    /// Positioned content derived from this domain's actions.
    fn payload(&self, _actions: &[Action]) -> TheoryResult<Vec<NoteEvent>> {
        Ok(Vec::new())
    }
}

/// One entity a property-chain call applies to.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    /// Container index the action is tagged with.
    pub track: usize,
    /// Descriptor when the target came from a filter or iteration.
    pub entity: Option<Entity>,
}

/// Interpretation context handed to domains.
pub struct Context<'a> {
    domain: &'static str,
    snapshot: &'a Snapshot,
    state: &'a mut InterpreterState,
}

impl<'a> Context<'a> {
    fn new(domain: &'static str, snapshot: &'a Snapshot, state: &'a mut InterpreterState) -> Self {
        Self {
            domain,
            snapshot,
            state,
        }
    }

    /// The read-only snapshot.
    pub fn snapshot(&self) -> &Snapshot {
        self.snapshot
    }

    /// Interpreter state (read-only view).
    pub fn state(&self) -> &InterpreterState {
        self.state
    }

    /// Interpreter state (mutable view).
    pub fn state_mut(&mut self) -> &mut InterpreterState {
        self.state
    }

    /// Append an action to the output.
    pub fn emit(&mut self, action: Action) {
        debug!(domain = self.domain, kind = %action.kind, "emit action");
        self.state.push_action(action);
    }

    /// Allocate and bind a fresh container index.
    pub fn create_entity(&mut self, explicit: Option<usize>) -> usize {
        let index = self.state.allocate(explicit);
        self.state.take_filtered();
        self.state.bind(index);
        index
    }

    /// Bind an existing container by 1-based id. Valid ids name a snapshot
    /// track or one created earlier in this invocation.
    pub fn reference_entity(&mut self, call: &Call, id: usize) -> Result<usize> {
        let index = id
            .checked_sub(1)
            .ok_or_else(|| call.invalid("id", "ids are 1-based"))?;
        if !self.snapshot.contains_track(index) && !self.state.was_created(index) {
            return Err(InterpreterError::UnresolvedReference {
                call: call.name.clone(),
                reference: format!("id={id}"),
            });
        }
        self.state.take_filtered();
        self.state.bind(index);
        Ok(index)
    }

    /// Bind the snapshot's selected container.
    pub fn reference_selected(&mut self, call: &Call) -> Result<usize> {
        let index = self.snapshot.selected_track().ok_or_else(|| {
            InterpreterError::UnresolvedReference {
                call: call.name.clone(),
                reference: "selected=true".into(),
            }
        })?;
        self.state.take_filtered();
        self.state.bind(index);
        Ok(index)
    }

    /// The bound container, ignoring any filtered set.
    pub fn bound(&self, call: &Call) -> Result<usize> {
        if let Some(binding) = self.state.iteration() {
            return Ok(binding.entity.track);
        }
        self.state
            .current_entity()
            .ok_or_else(|| InterpreterError::NoContext {
                call: call.name.clone(),
            })
    }

    /// Entities a property-chain call applies to.
    ///
    /// A pending filtered set wins and is consumed: one target per match, or
    /// none (recorded as a notice) when the filter matched nothing. Without a
    /// filtered set the iteration binding or bound entity is the only target.
    pub fn targets(&mut self, call: &Call) -> Result<Vec<Target>> {
        if let Some(filtered) = self.state.take_filtered() {
            if filtered.entities.is_empty() {
                warn!(
                    domain = self.domain,
                    collection = %filtered.collection,
                    call = %call.name,
                    "filter matched nothing; call is a no-op"
                );
                self.state.push_notice(Notice::EmptyFilter {
                    collection: filtered.collection,
                    call: call.name.clone(),
                });
                return Ok(Vec::new());
            }
            return Ok(filtered
                .entities
                .into_iter()
                .map(|entity| Target {
                    track: entity.track,
                    entity: Some(entity),
                })
                .collect());
        }
        if let Some(binding) = self.state.iteration() {
            return Ok(vec![Target {
                track: binding.entity.track,
                entity: Some(binding.entity.clone()),
            }]);
        }
        match self.state.current_entity() {
            Some(track) => Ok(vec![Target {
                track,
                entity: None,
            }]),
            None => Err(InterpreterError::NoContext {
                call: call.name.clone(),
            }),
        }
    }
}

/// Output of a successful interpretation.
#[derive(Debug, Clone, PartialEq)]
pub struct Interpretation {
    /// Actions in interpretation order.
    pub actions: Vec<Action>,
    /// Low-confidence outcomes.
    pub notices: Vec<Notice>,
}

/// Call-chain interpreter for one domain.
#[derive(Debug, Clone, Default)]
pub struct Interpreter<D> {
    domain: D,
}

impl<D: Domain> Interpreter<D> {
    /// Wrap a domain method table.
    pub fn new(domain: D) -> Self {
        Self { domain }
    }

    /// The domain.
    pub fn domain(&self) -> &D {
        &self.domain
    }

    /// Parse and interpret DSL text. All-or-nothing: any error discards
    /// every action, and a program yielding no actions is an error.
    pub fn interpret(&self, source: &str, snapshot: &Snapshot) -> Result<Interpretation> {
        let program = parse_program(source)?;
        self.interpret_program(&program, snapshot)
    }

    /// Interpret an already parsed program.
    pub fn interpret_program(&self, program: &Program, snapshot: &Snapshot) -> Result<Interpretation> {
        let state = self.execute(program, snapshot)?;
        let (actions, notices) = state.into_parts();
        if actions.is_empty() {
            return Err(InterpreterError::EmptyResult);
        }
        Ok(Interpretation { actions, notices })
    }

    /// Interpret the complete lines of a partially received program.
    ///
    /// Returns `None` while the prefix does not yet interpret cleanly.
    pub fn interpret_prefix(&self, text: &str, snapshot: &Snapshot) -> Option<Vec<Action>> {
        let end = text.rfind('\n')?;
        let program = parse_program(&text[..end]).ok()?;
        if program.statements.is_empty() {
            return None;
        }
        let state = self.execute(&program, snapshot).ok()?;
        Some(state.into_parts().0)
    }

    /// Run a program and return the final state without the empty-result
    /// check.
    pub fn execute(&self, program: &Program, snapshot: &Snapshot) -> Result<InterpreterState> {
        if program.statements.is_empty() {
            return Err(InterpreterError::EmptyInput);
        }
        let mut state = InterpreterState::new(snapshot);
        for statement in &program.statements {
            let mut cx = Context::new(self.domain.name(), snapshot, &mut state);
            for call in &statement.calls {
                self.dispatch(&mut cx, call)?;
            }
            state.end_statement();
        }
        Ok(state)
    }

    fn dispatch(&self, cx: &mut Context<'_>, call: &Call) -> Result<()> {
        debug!(domain = self.domain.name(), call = %call, "interpret call");
        match call.name.as_str() {
            "filter" => self.filter(cx, call),
            "for_each" => self.for_each(cx, call, false),
            "map" => self.map(cx, call),
            "store" => self.store(cx, call),
            name if self.domain.methods().contains(&name) => self.domain.apply(cx, call),
            _ => Err(self.unknown_method(call)),
        }
    }

    fn unknown_method(&self, call: &Call) -> InterpreterError {
        InterpreterError::UnknownMethod {
            domain: self.domain.name(),
            call: call.name.clone(),
        }
    }

    fn filter(&self, cx: &mut Context<'_>, call: &Call) -> Result<()> {
        let collection = call.string(("collection", 0))?;
        let predicate = call.predicate(("predicate", 1))?;
        if predicate.op.is_ordering() && matches!(predicate.literal, Literal::Bool(_)) {
            return Err(call.invalid("predicate", "booleans only support == and !="));
        }
        if cx.state.iteration().is_some() {
            return Err(InterpreterError::NestedIteration {
                call: call.name.clone(),
            });
        }
        let entities = lookup(cx.state, collection)?.to_vec();
        let variable = iteration_variable(collection);

        let mut matched = Vec::new();
        for entity in entities {
            let binding = Binding {
                variable: variable.clone(),
                entity,
            };
            if evaluate(call, predicate, &binding)? {
                matched.push(binding.entity);
            }
        }

        debug!(collection, predicate = %predicate, matches = matched.len(), "filter");
        cx.state
            .store_collection(format!("{collection}_filtered"), matched.clone());
        cx.state.set_filtered(Filtered {
            collection: collection.to_string(),
            entities: matched,
        });
        cx.state.unbind();
        Ok(())
    }

    fn for_each(&self, cx: &mut Context<'_>, call: &Call, mapped: bool) -> Result<()> {
        let (collection, func) = collection_and_function(call)?;
        if cx.state.iteration().is_some() {
            return Err(InterpreterError::NestedIteration {
                call: call.name.clone(),
            });
        }
        let verb = func.to_call();
        if BUILTINS.contains(&verb.name.as_str()) {
            return Err(InterpreterError::NestedIteration {
                call: verb.name.clone(),
            });
        }
        if !self.domain.methods().contains(&verb.name.as_str()) {
            return Err(self.unknown_method(&verb));
        }
        let entities = lookup(cx.state, collection)?.to_vec();
        let variable = iteration_variable(collection);
        cx.state.take_filtered();

        for entity in &entities {
            if let Some(receiver) = &func.receiver {
                if receiver != &variable && receiver != entity.kind.name() {
                    return Err(InterpreterError::UnboundVariable {
                        call: call.name.clone(),
                        variable: receiver.clone(),
                    });
                }
            }
            cx.state.begin_iteration(Binding {
                variable: variable.clone(),
                entity: entity.clone(),
            });
            cx.state.bind(entity.track);
            let outcome = self.domain.apply(cx, &verb);
            cx.state.end_iteration();
            cx.state.unbind();
            outcome?;
        }

        if mapped {
            cx.state
                .store_collection(format!("{collection}_mapped"), entities);
        }
        Ok(())
    }

    /// `map(collection, fn)`: a domain method behaves like `for_each` and
    /// keeps the visited entities; a property reference (`@name` or
    /// `@get_name`) projects that property into each entity's `value` field.
    fn map(&self, cx: &mut Context<'_>, call: &Call) -> Result<()> {
        let (collection, func) = collection_and_function(call)?;
        if func.args.is_some() || self.domain.methods().contains(&func.name.as_str()) {
            return self.for_each(cx, call, true);
        }
        let property = func.name.strip_prefix("get_").unwrap_or(func.name.as_str());
        let projected: Vec<Entity> = lookup(cx.state, collection)?
            .iter()
            .map(|entity| {
                let mut entity = entity.clone();
                let value = entity.field(property).cloned().unwrap_or(Value::None);
                entity.fields.insert("value".into(), value);
                entity
            })
            .collect();
        cx.state.take_filtered();
        cx.state.unbind();
        cx.state
            .store_collection(format!("{collection}_mapped"), projected);
        Ok(())
    }

    fn store(&self, cx: &mut Context<'_>, call: &Call) -> Result<()> {
        let name = call.string(("name", 0))?;
        let source = call.string(("collection", 1))?;
        let entities = lookup(cx.state, source)?.to_vec();
        cx.state.store_collection(name, entities);
        Ok(())
    }
}

fn lookup<'s>(state: &'s InterpreterState, collection: &str) -> Result<&'s [Entity]> {
    state
        .collection(collection)
        .ok_or_else(|| InterpreterError::UnknownCollection {
            collection: collection.to_string(),
        })
}

/// Accept `(collection, fn)` in either positional order.
fn collection_and_function(call: &Call) -> Result<(&str, &FunctionRef)> {
    if let Some(Value::Function(_)) = call.args.positional(0) {
        let func = call.function(("function", 0))?;
        let collection = call.string(("collection", 1))?;
        return Ok((collection, func));
    }
    let collection = call.string(("collection", 0))?;
    let func = call.function(("function", 1))?;
    Ok((collection, func))
}

fn evaluate(call: &Call, predicate: &Predicate, binding: &Binding) -> Result<bool> {
    if let Some(variable) = &predicate.path.variable {
        if variable != &binding.variable && variable != binding.entity.kind.name() {
            return Err(InterpreterError::UnboundVariable {
                call: call.name.clone(),
                variable: variable.clone(),
            });
        }
    }
    let Some(value) = binding.entity.field(&predicate.path.property) else {
        return Ok(false);
    };
    let value: &Value = match predicate.path.index {
        None => value,
        Some(idx) => match value {
            Value::Array(items) => match items.get(idx) {
                Some(item) => item,
                None => return Ok(false),
            },
            _ => return Ok(false),
        },
    };
    Ok(predicate.test(value))
}

/// Singular variable name for iterating a collection: `tracks` → `track`,
/// `fx_chain` → `fx`; names shorter than two characters become `item`.
pub fn iteration_variable(collection: &str) -> String {
    let name = collection.strip_suffix('s').unwrap_or(collection);
    let name = name.strip_suffix("_chain").unwrap_or(name);
    if name.len() < 2 {
        "item".to_string()
    } else {
        name.to_string()
    }
}
