/// Macro to simplify creating a closure compatible with [`JobRegistry::register`].
///
/// Wraps an async block into the `Fn(JobContext) -> JobFuture` shape, handling
/// the `Box::pin` plumbing. The block must evaluate to
/// `Result<JobOutcome, JobFailure>`.
///
/// # Usage
///
/// ```ignore
/// use taskmill::{job_fn, JobOutcome, JobRegistry};
///
/// let registry = JobRegistry::new()
///   // With access to the execution context:
///   .register("cleanup.run", job_fn!(|ctx| {
///     ctx.update_progress(0, 10).await?;
///     // ... do work ...
///     Ok(JobOutcome::Complete(serde_json::json!({"removed": 10})))
///   }))
///   // Ignoring the context:
///   .register("ping", job_fn!(|_| {
///     Ok(JobOutcome::Complete(serde_json::Value::Null))
///   }));
/// ```
///
/// [`JobRegistry::register`]: crate::registry::JobRegistry::register
#[macro_export]
macro_rules! job_fn {
    // Matcher 1: the context is bound to a name usable inside the block.
    (
        |$ctx:ident| $body:block
    ) => {
        move |$ctx: $crate::job::context::JobContext| {
            let fut = async move { $body };

            Box::pin(fut) as $crate::registry::JobFuture
        }
    };

    // Matcher 2: the context is ignored.
    (
        |_| $body:block
    ) => {
        move |_ctx: $crate::job::context::JobContext| {
            let fut = async move { $body };

            Box::pin(fut) as $crate::registry::JobFuture
        }
    };
}
