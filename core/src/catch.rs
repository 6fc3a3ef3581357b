//! Logging errors and panics escaping a closure.

use crate::logger::{Args, Logger};
use crate::models::level::ERROR;
use crate::models::{Callsite, LevelRef, RecordException};
use std::cell::Cell;
use std::error::Error;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Once};

/// Message logged by a [`Catcher`] unless replaced.
pub const DEFAULT_CATCH_MESSAGE: &str = "An error has been caught in function '{record[function]}', \
process '{record[process].name}' ({record[process].id}), \
thread '{record[thread].name}' ({record[thread].id}):";

type OnError = Arc<dyn Fn(&RecordException) + Send + Sync>;
type Exclude = Arc<dyn Fn(&(dyn Error + 'static)) -> bool + Send + Sync>;

thread_local! {
    /// Number of `guard` calls running on this thread.
    static GUARDED: Cell<usize> = const { Cell::new(0) };
}

static QUIET_HOOK: Once = Once::new();

/// Wraps the current panic hook so it stays silent on guarded threads.
fn install_quiet_hook() {
    QUIET_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if !panic_is_quiet() {
                previous(info);
            }
        }));
    });
}

fn panic_is_quiet() -> bool {
    GUARDED.try_with(Cell::get).unwrap_or(0) > 0
}

/// Marks the current thread as guarded until dropped.
struct Guarded;

impl Guarded {
    fn enter() -> Self {
        GUARDED.with(|depth| depth.set(depth.get() + 1));
        Self
    }
}

impl Drop for Guarded {
    fn drop(&mut self) {
        let _ = GUARDED.try_with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Logs the error returned, or the panic raised, by a closure.
///
/// Built by [`Logger::catch`](crate::Logger::catch).
///
/// # Example
///
/// ```
/// use logbook::handler::HandlerOptions;
/// use logbook::sink::MemorySink;
/// use logbook::Logger;
///
/// let logger = Logger::new();
/// let sink = MemorySink::new();
/// logger.add(sink.clone(), HandlerOptions::default().with_format("{level} {message}")).unwrap();
///
/// let parsed = logger
///     .catch()
///     .message("could not parse")
///     .run(|| "x1".parse::<u32>());
/// assert!(matches!(parsed, Ok(None)));
/// assert!(sink.messages()[0].starts_with("ERROR could not parse\n"));
/// ```
#[derive(Clone)]
pub struct Catcher {
    logger: Logger,
    level: LevelRef,
    reraise: bool,
    message: String,
    onerror: Option<OnError>,
    exclude: Option<Exclude>,
    callsite: Option<Callsite>,
}

impl Catcher {
    pub(crate) fn new(logger: Logger) -> Self {
        Self {
            logger,
            level: LevelRef::Name(ERROR.to_string()),
            reraise: false,
            message: DEFAULT_CATCH_MESSAGE.to_string(),
            onerror: None,
            exclude: None,
            callsite: None,
        }
    }

    /// Level of the logged record (default `ERROR`).
    #[must_use]
    pub fn level(mut self, level: impl Into<LevelRef>) -> Self {
        self.level = level.into();
        self
    }

    /// Propagate the error or resume the panic after logging it.
    #[must_use]
    pub fn reraise(mut self, reraise: bool) -> Self {
        self.reraise = reraise;
        self
    }

    /// Message of the logged record; `{record[...]}` placeholders are allowed.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Called with the captured error after it was logged.
    #[must_use]
    pub fn onerror<F>(mut self, onerror: F) -> Self
    where
        F: Fn(&RecordException) + Send + Sync + 'static,
    {
        self.onerror = Some(Arc::new(onerror));
        self
    }

    /// Errors for which the predicate holds are returned untouched.
    #[must_use]
    pub fn exclude<F>(mut self, exclude: F) -> Self
    where
        F: Fn(&(dyn Error + 'static)) -> bool + Send + Sync + 'static,
    {
        self.exclude = Some(Arc::new(exclude));
        self
    }

    /// Call site reported in the record instead of the caller of `run`/`guard`.
    #[must_use]
    pub fn callsite(mut self, callsite: Callsite) -> Self {
        self.callsite = Some(callsite);
        self
    }

    /// Runs `f`, logging its error.
    ///
    /// Returns `Ok(Some(value))` on success and `Ok(None)` when an error was
    /// logged and swallowed.
    ///
    /// # Errors
    ///
    /// Returns the closure's error when it is excluded or `reraise` is set.
    #[track_caller]
    pub fn run<T, E, F>(&self, f: F) -> Result<Option<T>, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: Error + 'static,
    {
        let callsite = match self.callsite {
            Some(callsite) => callsite,
            None => Callsite::caller(),
        };
        match f() {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                if self.exclude.as_ref().is_some_and(|exclude| exclude(&err)) {
                    return Err(err);
                }
                self.report(callsite, RecordException::new(&err));
                if self.reraise {
                    Err(err)
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Runs `f`, logging a panic.
    ///
    /// Returns `None` when a panic was logged and swallowed.
    ///
    /// The panic hook is not run for panics raised on this thread while `f`
    /// runs, so the logged record is the only report. On first use the
    /// current hook is wrapped once; a hook installed later replaces the
    /// wrapper and prints again.
    ///
    /// # Panics
    ///
    /// Resumes the panic after logging it when `reraise` is set.
    #[track_caller]
    pub fn guard<T, F>(&self, f: F) -> Option<T>
    where
        F: FnOnce() -> T,
    {
        let callsite = match self.callsite {
            Some(callsite) => callsite,
            None => Callsite::caller(),
        };
        install_quiet_hook();
        let outcome = {
            let _guarded = Guarded::enter();
            panic::catch_unwind(AssertUnwindSafe(f))
        };
        match outcome {
            Ok(value) => Some(value),
            Err(payload) => {
                self.report(callsite, RecordException::from_panic(payload.as_ref()));
                if self.reraise {
                    panic::resume_unwind(payload);
                }
                None
            }
        }
    }

    fn report(&self, callsite: Callsite, exception: RecordException) {
        let opt = self
            .logger
            .options()
            .clone()
            .with_exception_record(exception.clone())
            .with_record(true);
        let logger = self.logger.opt(opt);
        if let Err(err) = logger.dispatch(callsite, &self.level, &self.message, Args::new()) {
            tracing::warn!(error = %err, "Failed to log caught error");
        }
        if let Some(onerror) = &self.onerror {
            onerror(&exception);
        }
    }
}

impl fmt::Debug for Catcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catcher")
            .field("level", &self.level)
            .field("reraise", &self.reraise)
            .field("message", &self.message)
            .field("callsite", &self.callsite)
            .finish_non_exhaustive()
    }
}
