//! Module exposing a test [Scenario] type to write [Command] [Handler][crate::command::Handler]
//! test cases using the [given-then-when canvas](https://www.agilealliance.org/glossary/gwt/).

use crate::command::{Command, Error, Executor};
use crate::condition::AppendCondition;
use crate::cursor::Cursor;
use crate::event::AppendEvent;
use crate::query::Query;
use crate::store::{Appender, EventStoreExt, InMemory, Tracking};

/// A test scenario that can be used to test a [Command] through an [Executor]
/// using a [given-then-when canvas](https://www.agilealliance.org/glossary/gwt/) approach.
pub struct Scenario;

impl Scenario {
    /// Sets the precondition state of the system for the [Scenario], which
    /// is expressed by a list of events already in the Event Log.
    #[must_use]
    pub fn given(self, events: Vec<AppendEvent>) -> ScenarioGiven {
        ScenarioGiven { given: events }
    }

    /// Specifies the [Command] to test in the [Scenario], in the peculiar case
    /// of having a clean system.
    ///
    /// This is a shortcut for:
    /// ```text
    /// Scenario.given(vec![]).when(...)
    /// ```
    #[must_use]
    pub fn when<C>(self, command: C) -> ScenarioWhen<C>
    where
        C: Command,
    {
        ScenarioWhen {
            given: Vec::default(),
            when: command,
        }
    }
}

#[doc(hidden)]
pub struct ScenarioGiven {
    given: Vec<AppendEvent>,
}

impl ScenarioGiven {
    /// Specifies the [Command] to test in the [Scenario].
    #[must_use]
    pub fn when<C>(self, command: C) -> ScenarioWhen<C>
    where
        C: Command,
    {
        ScenarioWhen {
            given: self.given,
            when: command,
        }
    }
}

#[doc(hidden)]
pub struct ScenarioWhen<C>
where
    C: Command,
{
    given: Vec<AppendEvent>,
    when: C,
}

impl<C> ScenarioWhen<C>
where
    C: Command,
{
    /// Sets the expectation on the result of the [Scenario] to be positive
    /// and append the specified list of events.
    #[must_use]
    pub fn then(self, events: Vec<AppendEvent>) -> ScenarioThen<C> {
        self.expect(ScenarioThenCase::Produces(events))
    }

    /// Sets the expectation on the result of the [Scenario] to be an
    /// idempotent success, appending nothing.
    #[must_use]
    pub fn then_idempotent(self) -> ScenarioThen<C> {
        self.expect(ScenarioThenCase::Idempotent)
    }

    /// Sets the expectation on the result of the [Scenario] to be a
    /// concurrency conflict.
    #[must_use]
    pub fn then_conflicts(self) -> ScenarioThen<C> {
        self.expect(ScenarioThenCase::Conflicts)
    }

    /// Sets the expectation on the result of the [Scenario] to return
    /// any error other than a concurrency conflict.
    #[must_use]
    pub fn then_fails(self) -> ScenarioThen<C> {
        self.expect(ScenarioThenCase::Fails)
    }

    fn expect(self, case: ScenarioThenCase) -> ScenarioThen<C> {
        ScenarioThen {
            given: self.given,
            when: self.when,
            case,
        }
    }
}

enum ScenarioThenCase {
    Produces(Vec<AppendEvent>),
    Idempotent,
    Conflicts,
    Fails,
}

#[doc(hidden)]
pub struct ScenarioThen<C>
where
    C: Command,
{
    given: Vec<AppendEvent>,
    when: C,
    case: ScenarioThenCase,
}

impl<C> ScenarioThen<C>
where
    C: Command,
{
    /// Executes the whole [Scenario] by constructing an [Executor]
    /// with the provided closure function and running the specified assertions.
    ///
    /// # Panics
    ///
    /// The method panics if the assertion fails.
    pub async fn assert_on<F>(self, executor_factory: F)
    where
        F: Fn(Tracking<InMemory>) -> Executor<C, Tracking<InMemory>>,
    {
        let event_store = InMemory::default();
        let mut cursor = Cursor::zero();

        for event in self.given {
            cursor = event_store
                .append_if(vec![event], AppendCondition::new(Query::all()).after(cursor))
                .await
                .expect("event in 'given' should be inserted in the event store");
        }

        let tracking_event_store = event_store.with_recorded_events_tracking();
        let executor = executor_factory(tracking_event_store.clone());
        let result = executor.execute(&self.when).await;
        let recorded_events = tracking_event_store.recorded_events();

        match self.case {
            ScenarioThenCase::Produces(events) => {
                let result = result.expect("command should be executed successfully");
                assert!(result.was_created(), "expected new events, got {result:?}");
                assert_eq!(events, recorded_events);
            },
            ScenarioThenCase::Idempotent => {
                let result = result.expect("command should be executed successfully");
                assert!(result.was_idempotent(), "expected idempotent result, got {result:?}");
                assert!(recorded_events.is_empty());
            },
            ScenarioThenCase::Conflicts => {
                assert!(
                    matches!(result, Err(Error::Concurrency(_))),
                    "expected concurrency conflict, got {result:?}"
                );
                assert!(recorded_events.is_empty());
            },
            ScenarioThenCase::Fails => {
                assert!(
                    matches!(&result, Err(err) if !matches!(err, Error::Concurrency(_))),
                    "expected failure, got {result:?}"
                );
                assert!(recorded_events.is_empty());
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::command::{CommandResult, Handler, DUPLICATE_OPERATION};
    use crate::projection::{self, StateProjector};
    use crate::query::QueryItem;
    use crate::store::Streamer;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum WalletCommand {
        Open { wallet_id: String },
        Deposit { wallet_id: String, operation_id: String },
        Untyped,
    }

    impl Command for WalletCommand {
        fn command_type(&self) -> &str {
            match self {
                WalletCommand::Open { .. } => "open_wallet",
                WalletCommand::Deposit { .. } => "deposit",
                WalletCommand::Untyped => "",
            }
        }
    }

    fn opened(wallet_id: &str) -> AppendEvent {
        AppendEvent::new("WalletOpened", b"{}".to_vec()).with_tag("wallet_id", wallet_id)
    }

    fn deposited(wallet_id: &str, operation_id: &str) -> AppendEvent {
        AppendEvent::new("DepositMade", b"{}".to_vec())
            .with_tag("wallet_id", wallet_id)
            .with_tag("operation_id", operation_id)
    }

    /// Opens a wallet that was never closed, relying on the idempotency query
    /// to reject a second opening.
    struct OpenWallet;

    #[async_trait]
    impl Handler<WalletCommand> for OpenWallet {
        async fn handle(
            &self,
            _store: &dyn Streamer,
            command: &WalletCommand,
        ) -> anyhow::Result<CommandResult> {
            let WalletCommand::Open { wallet_id } = command else {
                anyhow::bail!("unexpected command: {command:?}");
            };

            let query: Query = QueryItem::new()
                .with_types(["WalletOpened"])
                .with_tag("wallet_id", wallet_id)
                .into();

            Ok(CommandResult::new(
                vec![opened(wallet_id)],
                AppendCondition::new(Query::from(
                    QueryItem::new()
                        .with_types(["WalletClosed"])
                        .with_tag("wallet_id", wallet_id),
                ))
                .with_already_exists(query),
            ))
        }
    }

    /// Deposits on an opened wallet; blind to previous deposits so that
    /// duplicates are only caught by the idempotency query.
    struct Deposit;

    #[async_trait]
    impl Handler<WalletCommand> for Deposit {
        async fn handle(
            &self,
            store: &dyn Streamer,
            command: &WalletCommand,
        ) -> anyhow::Result<CommandResult> {
            let WalletCommand::Deposit {
                wallet_id,
                operation_id,
            } = command
            else {
                anyhow::bail!("unexpected command: {command:?}");
            };

            let projectors = vec![StateProjector::new("opened", false, |_, _| Ok(true))
                .with_types(["WalletOpened"])
                .with_tag("wallet_id", wallet_id)];

            let model = projection::decision_model(store, &projectors).await?;

            if !model.state {
                anyhow::bail!("wallet {wallet_id} is not open");
            }

            Ok(CommandResult::new(
                vec![deposited(wallet_id, operation_id)],
                model.condition().with_already_exists(
                    QueryItem::new()
                        .with_types(["DepositMade"])
                        .with_tag("operation_id", operation_id)
                        .into(),
                ),
            ))
        }
    }

    fn executor(store: Tracking<InMemory>) -> Executor<WalletCommand, Tracking<InMemory>> {
        Executor::new(store)
            .with_handler("open_wallet", OpenWallet)
            .with_handler("deposit", Deposit)
            .with_conflict_on_duplicate("open_wallet")
    }

    fn deposit_command(operation_id: &str) -> WalletCommand {
        WalletCommand::Deposit {
            wallet_id: "w-1".to_owned(),
            operation_id: operation_id.to_owned(),
        }
    }

    #[tokio::test]
    async fn deposit_on_open_wallet_produces_event() {
        Scenario
            .given(vec![opened("w-1")])
            .when(deposit_command("op-1"))
            .then(vec![deposited("w-1", "op-1")])
            .assert_on(executor)
            .await;
    }

    #[tokio::test]
    async fn repeated_deposit_is_idempotent() {
        Scenario
            .given(vec![opened("w-1"), deposited("w-1", "op-1")])
            .when(deposit_command("op-1"))
            .then_idempotent()
            .assert_on(executor)
            .await;
    }

    #[tokio::test]
    async fn repeated_opening_is_a_conflict() {
        Scenario
            .given(vec![opened("w-1")])
            .when(WalletCommand::Open {
                wallet_id: "w-1".to_owned(),
            })
            .then_conflicts()
            .assert_on(executor)
            .await;
    }

    /// Deposits on a decision model read before any deposit was made.
    struct StaleDeposit;

    #[async_trait]
    impl Handler<WalletCommand> for StaleDeposit {
        async fn handle(
            &self,
            _store: &dyn Streamer,
            command: &WalletCommand,
        ) -> anyhow::Result<CommandResult> {
            let WalletCommand::Deposit {
                wallet_id,
                operation_id,
            } = command
            else {
                anyhow::bail!("unexpected command: {command:?}");
            };

            let wallet_events: Query = QueryItem::new()
                .with_types(["WalletOpened", "DepositMade"])
                .with_tag("wallet_id", wallet_id)
                .into();

            Ok(CommandResult::new(
                vec![deposited(wallet_id, operation_id)],
                AppendCondition::new(wallet_events)
                    .after(Cursor::zero())
                    .with_already_exists(
                        QueryItem::new()
                            .with_types(["DepositMade"])
                            .with_tag("operation_id", operation_id)
                            .into(),
                    ),
            ))
        }
    }

    #[tokio::test]
    async fn repeated_deposit_on_stale_read_is_a_conflict() {
        Scenario
            .given(vec![opened("w-1"), deposited("w-1", "op-1")])
            .when(deposit_command("op-1"))
            .then_conflicts()
            .assert_on(|store| Executor::new(store).with_handler("deposit", StaleDeposit))
            .await;
    }

    #[tokio::test]
    async fn stale_read_and_duplicate_report_both_counts() {
        let store = InMemory::default();
        store
            .append_if(
                vec![opened("w-1"), deposited("w-1", "op-1")],
                AppendCondition::new(Query::all()),
            )
            .await
            .expect("given events should be appended");

        let executor = Executor::new(store.clone()).with_handler("deposit", StaleDeposit);

        let err = executor
            .execute(&deposit_command("op-1"))
            .await
            .expect_err("the read was stale");

        let violation = err
            .violation()
            .expect("the error should be a concurrency conflict");
        assert!(!violation.is_duplicate_only());
        assert_eq!(2, violation.state_changed_count);
        assert_eq!(1, violation.already_exists_count);
        assert_eq!(2, store.len());
    }

    #[tokio::test]
    async fn deposit_on_missing_wallet_fails() {
        Scenario
            .when(deposit_command("op-1"))
            .then_fails()
            .assert_on(executor)
            .await;
    }

    #[tokio::test]
    async fn empty_command_type_is_invalid() {
        Scenario
            .when(WalletCommand::Untyped)
            .then_fails()
            .assert_on(executor)
            .await;
    }

    #[tokio::test]
    async fn unregistered_command_type_is_invalid() {
        let executor = Executor::<WalletCommand, _>::new(InMemory::default());

        let err = executor
            .execute(&deposit_command("op-1"))
            .await
            .expect_err("no handler is registered");

        assert!(matches!(err, Error::InvalidCommand(_)));
    }

    #[tokio::test]
    async fn handler_short_circuit_defaults_to_duplicate_reason() {
        struct AlwaysDuplicate;

        #[async_trait]
        impl Handler<WalletCommand> for AlwaysDuplicate {
            async fn handle(
                &self,
                _store: &dyn Streamer,
                _command: &WalletCommand,
            ) -> anyhow::Result<CommandResult> {
                Ok(CommandResult::idempotent())
            }
        }

        let store = InMemory::default();
        let executor = Executor::<WalletCommand, _>::new(store.clone());

        let result = executor
            .execute_with(&deposit_command("op-1"), &AlwaysDuplicate)
            .await
            .expect("short-circuited duplicates are successful");

        assert!(result.was_idempotent());
        assert_eq!(Some(DUPLICATE_OPERATION.to_owned()), result.reason);
        assert!(store.is_empty());
        assert!(store.commands().is_empty());
    }

    #[tokio::test]
    async fn malformed_events_from_handler_are_invalid() {
        struct EmptyTag;

        #[async_trait]
        impl Handler<WalletCommand> for EmptyTag {
            async fn handle(
                &self,
                _store: &dyn Streamer,
                _command: &WalletCommand,
            ) -> anyhow::Result<CommandResult> {
                Ok(CommandResult::new(
                    vec![opened("")],
                    AppendCondition::new(Query::all()),
                ))
            }
        }

        let store = InMemory::default();
        let executor = Executor::<WalletCommand, _>::new(store.clone());

        let err = executor
            .execute_with(&deposit_command("op-1"), &EmptyTag)
            .await
            .expect_err("empty tag values are invalid");

        assert!(matches!(err, Error::InvalidCommand(_)));
        assert!(store.is_empty());
    }
}
