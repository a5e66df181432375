//! End-to-end scenarios over small operation graphs.

use ripple_incremental::{
    AggregateKind, AggregateOperation, Attach, CollectionChange, Error, EvalContext, Lambda,
    Observable, ObservableSequence, ObservableVec, Operation, OrderByOperation,
    PredicateAggregate, ProjectionAggregate, Value, VariableOperation,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|&v| Value::Int64(v)).collect()
}

fn record(
    sequence: &dyn ObservableSequence,
) -> (Rc<RefCell<Vec<CollectionChange>>>, ripple_reactive::Subscription) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let l = log.clone();
    let sub = sequence.collection_changed().subscribe(move |change| {
        l.borrow_mut().push(change.clone());
        Ok(())
    });
    (log, sub)
}

/// Items are object ids; each object's sort key is an externally owned variable.
fn key_of_object(keys: Vec<Rc<VariableOperation>>) -> Lambda {
    Lambda::new("o", move |ctx| {
        let id = ctx
            .value_of("o")?
            .as_i64()
            .ok_or_else(|| Error::evaluation("object id must be an integer"))?;
        let key = keys
            .get(id as usize)
            .cloned()
            .ok_or_else(|| Error::evaluation("unknown object"))?;
        Ok(key as Rc<dyn Operation>)
    })
}

#[test]
fn order_by_identity_then_insert() {
    init_tracing();
    let source = Rc::new(ObservableVec::from_values([3i64, 1, 2]));
    let view = OrderByOperation::order_by(EvalContext::root(), Lambda::identity("x"));
    view.attach(source.clone()).unwrap();
    assert_eq!(view.items(), ints(&[1, 2, 3]));

    let (log, _sub) = record(view.as_ref());
    source.insert(0, Value::Int64(0)).unwrap();

    assert_eq!(view.items(), ints(&[0, 1, 2, 3]));
    assert_eq!(*log.borrow(), vec![CollectionChange::added(0, ints(&[0]))]);
}

#[test]
fn count_where_even_after_removal() {
    init_tracing();
    let source = Rc::new(ObservableVec::from_values([1i64, 2, 3, 4]));
    let evens = PredicateAggregate::count_where(
        EvalContext::root(),
        Lambda::map("x", |v| Ok(Value::Boolean(v.as_i64().unwrap_or(1) % 2 == 0))),
    )
    .unwrap();
    evens.attach(source.clone()).unwrap();
    assert_eq!(evens.value(), Value::Int64(2));

    assert!(source.remove_item(&Value::Int64(2)).unwrap());
    assert_eq!(evens.value(), Value::Int64(1));
}

#[test]
fn external_key_change_on_singleton() {
    init_tracing();
    let keys = vec![VariableOperation::new(Value::Int64(5))];
    let source = Rc::new(ObservableVec::from_values([0i64]));
    let view = OrderByOperation::order_by(EvalContext::root(), key_of_object(keys.clone()));
    view.attach(source.clone()).unwrap();

    let (log, _sub) = record(view.as_ref());
    keys[0].set(Value::Int64(1)).unwrap();

    assert_eq!(view.items(), ints(&[0]));
    assert_eq!(view.sorted_keys(), ints(&[1]));
    assert_eq!(*log.borrow(), vec![CollectionChange::reset()]);
}

#[test]
fn external_key_change_moves_item() {
    init_tracing();
    let keys = vec![
        VariableOperation::new(Value::Int64(5)),
        VariableOperation::new(Value::Int64(3)),
    ];
    let source = Rc::new(ObservableVec::from_values([0i64, 1]));
    let view = OrderByOperation::order_by(EvalContext::root(), key_of_object(keys.clone()));
    view.attach(source.clone()).unwrap();
    assert_eq!(view.items(), ints(&[1, 0]));

    keys[0].set(Value::Int64(1)).unwrap();
    assert_eq!(view.items(), ints(&[0, 1]));
    assert_eq!(view.sorted_keys(), ints(&[1, 3]));
}

#[test]
fn reset_rebuilds_once() {
    init_tracing();
    let calls = Rc::new(Cell::new(0usize));
    let c = calls.clone();
    let total = AggregateOperation::custom_with_lambda(
        EvalContext::root(),
        Lambda::map("x", |v| Ok(v.clone())),
        move |state| {
            c.set(c.get() + 1);
            Ok(Value::Int64(
                state.values().iter().filter_map(Value::as_i64).sum(),
            ))
        },
    )
    .unwrap();
    let source = Rc::new(ObservableVec::from_values([1i64, 2, 3]));
    total.attach(source.clone()).unwrap();
    assert_eq!(total.value(), Value::Int64(6));

    let container = total.lambdas().unwrap().clone();
    let old_ids = container.ids();
    let before = calls.get();

    source.replace_all(ints(&[10, 20])).unwrap();

    assert_eq!(calls.get(), before + 1);
    assert_eq!(total.value(), Value::Int64(30));
    assert_eq!(container.len(), 2);
    assert!(container.ids().iter().all(|id| !old_ids.contains(id)));
}

#[test]
fn teardown_is_idempotent() {
    init_tracing();
    let source = Rc::new(ObservableVec::from_values([2i64, 1]));
    let view = OrderByOperation::order_by(EvalContext::root(), Lambda::identity("x"));
    view.attach(source.clone()).unwrap();
    let count = PredicateAggregate::any_where(
        EvalContext::root(),
        Lambda::map("x", |v| Ok(Value::Boolean(v.as_i64() == Some(1)))),
    )
    .unwrap();
    count.attach(view.clone()).unwrap();
    let (log, _sub) = record(view.as_ref());

    count.dispose();
    count.dispose();
    view.dispose();
    view.dispose();
    source.push(Value::Int64(3)).unwrap();

    assert!(log.borrow().is_empty());
    assert_eq!(source.collection_changed().listener_count(), 0);
    assert_eq!(view.collection_changed().listener_count(), 1);
}

#[test]
fn chained_ordering_is_rejected() {
    let view = OrderByOperation::order_by(EvalContext::root(), Lambda::identity("x"));
    let err = view.then_by(Lambda::identity("x")).err().unwrap();
    assert!(err.is_invalid_state());
}

#[test]
fn failing_sibling_does_not_desync_order_view() {
    init_tracing();
    let source = Rc::new(ObservableVec::from_values([1i64, 2]));
    let sum = ProjectionAggregate::new(
        EvalContext::root(),
        AggregateKind::Sum,
        Lambda::map("x", |v| match v.as_i64() {
            Some(99) => Err(Error::evaluation("no 99")),
            _ => Ok(v.clone()),
        }),
    )
    .unwrap();
    sum.attach(source.clone()).unwrap();
    let view = OrderByOperation::order_by(EvalContext::root(), Lambda::identity("x"));
    view.attach(source.clone()).unwrap();

    assert_eq!(source.push(Value::Int64(99)), Err(Error::evaluation("no 99")));
    assert_eq!(view.items(), ints(&[1, 2, 99]));
    assert_eq!(sum.value(), Value::Int64(3));

    // Only the aggregate is out of step with the source now
    assert!(source.push(Value::Int64(5)).is_err());
    assert_eq!(view.items(), ints(&[1, 2, 5, 99]));
    assert_eq!(source.items(), ints(&[1, 2, 99, 5]));
}
