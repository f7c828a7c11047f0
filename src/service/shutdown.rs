// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::future::Future;

use tokio::sync::broadcast;

/// Listens for the server-wide shutdown broadcast.
///
/// A receiver only sees signals sent after it subscribed, so a `Shutdown` must be
/// created before the work it guards can be handed to another task. A dropped
/// sender counts as a shutdown signal.
#[derive(Debug)]
pub struct Shutdown {
    is_shutdown: bool,
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            is_shutdown: false,
            notify,
        }
    }

    pub fn subscribe(notify_shutdown: &broadcast::Sender<()>) -> Shutdown {
        Shutdown::new(notify_shutdown.subscribe())
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    /// Waits for the signal. Returns immediately once it has been seen.
    pub async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }
        // Ok, Lagged and Closed all mean the same thing here
        let _ = self.notify.recv().await;
        self.is_shutdown = true;
    }

    /// Drives `fut` unless the signal arrives first, in which case `fut` is
    /// dropped and `None` returned. A pending signal always wins over a ready `fut`.
    pub async fn until<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.recv() => None,
            out = fut => Some(out),
        }
    }
}
