/*! Bounded multi-producer, multi-consumer channels with multi-way `select`.

A [`Chan<T>`] is a single cloneable handle, not a sender/receiver pair — any
handle can send, receive, or close, exactly like a channel value in Go. A
channel of capacity `0` is an unbuffered rendezvous: `send` blocks until a
`recv` is ready to take the value directly, with no copy through a buffer.

```
use multichan::make;

let c = multichan::make(1);
c.send(1).unwrap();
assert_eq!(c.recv().unwrap(), 1);
```

[`select::select`] waits on several channels at once, running whichever
case's channel becomes ready first:

```
use multichan::{make, RecvOutcome};
use multichan::select::{recv, select};

let a = make::<i32>(1);
let b = make::<i32>(1);
a.send(10).unwrap();

let got = select(vec![recv(&a, |v| v), recv(&b, |v| v)], None);
assert_eq!(got, RecvOutcome::Msg(10));
```

Passing a `default` makes `select` non-blocking: it runs immediately if no
case is ready on the first pass.
*/

mod chan;
mod error;
mod id;
mod park;
pub mod select;
mod waiter;

pub use chan::{make, Chan};
pub use error::{CloseError, RecvOutcome, SendError};
