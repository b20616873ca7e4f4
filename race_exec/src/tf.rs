//! # Transforms
//!
//! Planar rigid transforms between named frames, and the gateway used to look them up.
//!
//! A transform `T_a_b` takes points expressed in frame `b` into frame `a`, which is what
//! [`TransformProvider::lookup`] returns for `lookup("a", "b", ..)`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, PoisonError, RwLock},
    thread,
    time::Duration,
};

use comms_if::msg::{QuaternionMsg, TransformStamped};
use log::{debug, warn};
use nalgebra::{Quaternion, UnitQuaternion, Vector2};
use serde::Serialize;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A rigid transform in the plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Transform2 {
    /// Position of the source frame's origin in the target frame
    pub translation: Vector2<f64>,

    /// Rotation of the source frame relative to the target frame
    pub yaw: f64,
}

/// In-memory transform tree fed by [`TransformStamped`] messages.
///
/// Only the latest transform of each parent/child pair is kept. Lookups may traverse any number
/// of edges in either direction.
#[derive(Debug, Default)]
pub struct TfBuffer {
    edges: RwLock<HashMap<(String, String), (Transform2, f64)>>,

    /// If set, lookups at a given time fail if any edge used is older than this
    max_age_s: Option<f64>,
}

/// Wraps a [`TransformProvider`], remembering the last good transform of each frame pair.
pub struct TfCache {
    provider: Arc<dyn TransformProvider>,

    retry_sleep: Duration,

    last_good: Mutex<HashMap<(String, String), Transform2>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
pub enum TfError {
    #[error("No transform from {source_frame:?} into {target_frame:?} is available")]
    Unavailable {
        target_frame: String,
        source_frame: String,
    },

    #[error("Transform from {source_frame:?} into {target_frame:?} is {age_s:.3} s old")]
    Stale {
        target_frame: String,
        source_frame: String,
        age_s: f64,
    },

    #[error("Transform buffer lock is poisoned")]
    PoisonError,
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// The geometry gateway, a source of transforms between named frames.
pub trait TransformProvider: Send + Sync {
    /// Get the transform taking points in `source` into `target`.
    ///
    /// `stamp_s` is the time the transform is required at, `None` meaning the latest available.
    fn lookup(&self, target: &str, source: &str, stamp_s: Option<f64>)
        -> Result<Transform2, TfError>;
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Transform2 {
    pub fn new(x: f64, y: f64, yaw: f64) -> Self {
        Self {
            translation: Vector2::new(x, y),
            yaw,
        }
    }

    pub fn identity() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Build from a message, keeping only the planar part.
    pub fn from_msg(msg: &TransformStamped) -> Self {
        Self::new(
            msg.translation.x,
            msg.translation.y,
            yaw_from_quaternion(&msg.rotation),
        )
    }

    /// Transform a point from the source frame into the target frame.
    pub fn apply(&self, point: &Vector2<f64>) -> Vector2<f64> {
        let (s, c) = self.yaw.sin_cos();
        Vector2::new(
            c * point.x - s * point.y + self.translation.x,
            s * point.x + c * point.y + self.translation.y,
        )
    }

    pub fn inverse(&self) -> Self {
        let (s, c) = self.yaw.sin_cos();
        Self::new(
            -(c * self.translation.x + s * self.translation.y),
            s * self.translation.x - c * self.translation.y,
            -self.yaw,
        )
    }

    /// Chain two transforms, `T_a_b.then(T_b_c) == T_a_c`.
    pub fn then(&self, other: &Transform2) -> Self {
        Self {
            translation: self.apply(&other.translation),
            yaw: util::maths::wrap_to_pi(self.yaw + other.yaw),
        }
    }
}

impl TfBuffer {
    pub fn new(max_age_s: Option<f64>) -> Self {
        Self {
            edges: RwLock::new(HashMap::new()),
            max_age_s,
        }
    }

    /// Insert or replace the transform between the message's frames.
    pub fn set_transform(&self, msg: &TransformStamped) -> Result<(), TfError> {
        let mut edges = self.edges.write()?;
        edges.insert(
            (msg.frame.clone(), msg.child_frame.clone()),
            (Transform2::from_msg(msg), msg.stamp_s),
        );
        Ok(())
    }
}

impl TransformProvider for TfBuffer {
    fn lookup(
        &self,
        target: &str,
        source: &str,
        stamp_s: Option<f64>,
    ) -> Result<Transform2, TfError> {
        if target == source {
            return Ok(Transform2::identity());
        }

        let edges = self.edges.read()?;

        // Breadth first search from the target frame, accumulating T_target_node. Every edge can be
        // walked in both directions by inverting it.
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        visited.insert(target.to_string());
        queue.push_back((target.to_string(), Transform2::identity(), f64::INFINITY));

        while let Some((node, t_target_node, oldest)) = queue.pop_front() {
            if node == source {
                if let (Some(req), Some(max_age)) = (stamp_s, self.max_age_s) {
                    if req - oldest > max_age {
                        return Err(TfError::Stale {
                            target_frame: target.into(),
                            source_frame: source.into(),
                            age_s: req - oldest,
                        });
                    }
                }
                return Ok(t_target_node);
            }

            for ((parent, child), (t, stamp)) in edges.iter() {
                let (next, t_node_next) = if *parent == node {
                    (child, *t)
                } else if *child == node {
                    (parent, t.inverse())
                } else {
                    continue;
                };

                if visited.insert(next.clone()) {
                    queue.push_back((
                        next.clone(),
                        t_target_node.then(&t_node_next),
                        oldest.min(*stamp),
                    ));
                }
            }
        }

        Err(TfError::Unavailable {
            target_frame: target.into(),
            source_frame: source.into(),
        })
    }
}

impl TfCache {
    pub fn new(provider: Arc<dyn TransformProvider>, retry_sleep: Duration) -> Self {
        Self {
            provider,
            retry_sleep,
            last_good: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a transform valid at `stamp_s`, failing if the provider can't supply it right now.
    pub fn lookup_fresh(
        &self,
        target: &str,
        source: &str,
        stamp_s: Option<f64>,
    ) -> Result<Transform2, TfError> {
        let t = self.provider.lookup(target, source, stamp_s)?;

        self.last_good
            .lock()?
            .insert((target.to_string(), source.to_string()), t);

        Ok(t)
    }

    /// Look up a transform, retrying once after a short sleep and then falling back on the last
    /// good transform for this frame pair.
    pub fn lookup_or_cached(
        &self,
        target: &str,
        source: &str,
        stamp_s: Option<f64>,
    ) -> Result<Transform2, TfError> {
        let err = match self.lookup_fresh(target, source, stamp_s) {
            Ok(t) => return Ok(t),
            Err(e) => e,
        };

        warn!("Transform lookup failed: {}", err);
        thread::sleep(self.retry_sleep);

        if let Ok(t) = self.lookup_fresh(target, source, stamp_s) {
            return Ok(t);
        }

        match self
            .last_good
            .lock()?
            .get(&(target.to_string(), source.to_string()))
        {
            Some(t) => {
                debug!("Using cached transform {} <- {}", target, source);
                Ok(*t)
            }
            None => Err(err),
        }
    }
}

impl<G> From<PoisonError<G>> for TfError {
    fn from(_: PoisonError<G>) -> Self {
        Self::PoisonError
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Extract the heading (yaw) from a quaternion. Roll and pitch are discarded.
pub fn yaw_from_quaternion(q: &QuaternionMsg) -> f64 {
    UnitQuaternion::from_quaternion(Quaternion::new(q.w, q.x, q.y, q.z))
        .euler_angles()
        .2
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
