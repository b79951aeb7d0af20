//! Event handling.

use crate::event::Event;

/// Trait implemented by components that consume events.
pub trait EventHandler {
    /// Processes a single event.
    ///
    /// Handlers typically match on the payload type with the
    /// [`dispatch!`](crate::dispatch!) macro.
    fn on(&mut self, event: Event);
}

/// Matches a boxed event payload against a list of concrete types.
///
/// Each arm attempts a single consuming downcast; on a mismatch the
/// payload box travels on to the next arm, and a payload matching no
/// arm is logged at error level. Bindings destructure the payload by
/// value, and the event's `time`/`src`/`dst` fields stay accessible
/// inside arm bodies.
///
/// ```ignore
/// dispatch!(match event.data {
///     RequestArrival { request } => { self.on_arrival(request, event.time) }
///     RequestTimeout { request } => { self.on_timeout(request) }
/// })
/// ```
#[macro_export]
macro_rules! dispatch {
    ( match $event:ident.data { $( $kind:ident { $($binding:tt)* } => { $($body:tt)* } )+ } ) => {{
        let (__time, __src, __dst) = ($event.time, $event.src, $event.dst);
        let mut __payload = $event.data;
        'dispatch: {
            $(
                __payload = match __payload.downcast::<$kind>() {
                    Ok(__boxed) => {
                        let $kind { $($binding)* } = *__boxed;
                        $($body)*
                        break 'dispatch;
                    }
                    Err(__other) => __other,
                };
            )+
            $crate::log::log_unmatched_event(__time, __src, __dst, __payload);
        }
    }};
}
