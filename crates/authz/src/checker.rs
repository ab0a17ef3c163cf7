use crate::error::{CheckError, Result};
use crate::resolver::{CheckResolver, CheckResolverConfig};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::StreamExt;
use rebac_models::{
    RelationRef, ResolveCheckRequest, ResolveCheckResponse, Rewrite, TupleKey, TypeSystem, UserRef,
};
use rebac_storage::{ContextualTupleReader, ReadUsersetTuplesFilter, TupleReader};
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How a combinator race concludes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RaceMode {
    /// Union: the first `true` decides; `false` only when every child is
    /// `false`.
    Any,
    /// Intersection: the first `false` decides; `true` only when every
    /// child is `true`.
    All,
}

/// The recursive check evaluator. Dispatches on the relation's rewrite,
/// races union/intersection/difference children with first-decisive-wins
/// semantics, enforces the resolution depth bound, and re-enters every
/// sub-check through its delegate so sub-problems are memoized.
pub struct LocalChecker {
    datastore: Arc<dyn TupleReader>,
    typesystem: TypeSystem,
    resolution_depth_limit: u32,
    concurrency: Arc<Semaphore>,
    self_ref: Weak<LocalChecker>,
    delegate: RwLock<Weak<dyn CheckResolver>>,
}

impl LocalChecker {
    /// The checker starts out as its own delegate, so it is usable
    /// standalone; `ResolverChain` rebinds the delegate to the cached
    /// resolver.
    pub fn new(
        datastore: Arc<dyn TupleReader>,
        typesystem: TypeSystem,
        config: &CheckResolverConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<LocalChecker>| {
            let self_delegate: Weak<dyn CheckResolver> = weak.clone();
            Self {
                datastore,
                typesystem,
                resolution_depth_limit: config.resolution_depth_limit,
                concurrency: Arc::new(Semaphore::new(config.concurrency_limit)),
                self_ref: weak.clone(),
                delegate: RwLock::new(self_delegate),
            }
        })
    }

    /// Rebind where sub-checks are dispatched. Held weakly: the chain owner
    /// keeps the delegate alive.
    pub fn set_delegate(&self, delegate: Weak<dyn CheckResolver>) {
        *self.delegate.write().expect("delegate lock poisoned") = delegate;
    }

    fn dispatcher(&self) -> Result<Arc<dyn CheckResolver>> {
        self.delegate
            .read()
            .expect("delegate lock poisoned")
            .upgrade()
            .ok_or_else(|| CheckError::Internal("check delegate dropped".to_string()))
    }

    fn strong(&self) -> Result<Arc<Self>> {
        self.self_ref
            .upgrade()
            .ok_or_else(|| CheckError::Internal("checker dropped mid-resolution".to_string()))
    }

    fn check_rewrite(
        self: Arc<Self>,
        req: ResolveCheckRequest,
        reader: Arc<dyn TupleReader>,
        rewrite: Rewrite,
    ) -> BoxFuture<'static, Result<ResolveCheckResponse>> {
        Box::pin(async move {
            match rewrite {
                Rewrite::This {} => self.check_direct(req, reader).await,
                Rewrite::ComputedUserset { relation } => {
                    self.check_computed_userset(req, &relation).await
                }
                Rewrite::TupleToUserset {
                    tupleset,
                    computed_userset,
                } => {
                    self.check_tuple_to_userset(req, reader, tupleset, computed_userset)
                        .await
                }
                Rewrite::Union { child } => {
                    self.evaluate_children(req, reader, child, RaceMode::Any).await
                }
                Rewrite::Intersection { child } => {
                    self.evaluate_children(req, reader, child, RaceMode::All).await
                }
                Rewrite::Difference { base, subtract } => {
                    self.check_difference(req, reader, *base, *subtract).await
                }
            }
        })
    }

    /// Direct (`this`) evaluation. A concrete subject is answered by the
    /// point lookup, a matching typed wildcard, or membership in one of the
    /// userset tuples on the object; a userset subject matches only its
    /// identical stored tuple.
    async fn check_direct(
        self: Arc<Self>,
        req: ResolveCheckRequest,
        reader: Arc<dyn TupleReader>,
    ) -> Result<ResolveCheckResponse> {
        let object_type = req.tuple_key.object.object_type.clone();
        let relation = req.tuple_key.relation.clone();
        let declared = self
            .typesystem
            .directly_related_user_types(&object_type, &relation)?;
        // Concrete subjects are answered by the point lookup; the scan only
        // needs the userset and wildcard references.
        let restrictions: Vec<_> = declared
            .iter()
            .filter(|r| r.relation.is_some() || r.is_wildcard())
            .cloned()
            .collect();

        let mut query_count = 0u32;

        let subject_type = match &req.tuple_key.user {
            UserRef::Object(subject) => {
                query_count += 1;
                if reader
                    .read_user_tuple(&req.store_id, &req.tuple_key)
                    .await?
                    .is_some()
                {
                    return Ok(ResolveCheckResponse::new(true).with_query_count(query_count));
                }
                Some(subject.object_type.clone())
            }
            _ => None,
        };

        query_count += 1;
        let filter = ReadUsersetTuplesFilter {
            object: req.tuple_key.object.clone(),
            relation: relation.clone(),
            allowed_user_type_restrictions: restrictions,
        };
        let mut tuples = reader.read_userset_tuples(&req.store_id, filter).await?;

        let mut dispatches = Vec::new();
        loop {
            let item = tokio::select! {
                _ = req.cancellation.cancelled() => return Err(CheckError::Cancelled),
                item = tuples.next() => item,
            };
            let Some(tuple) = item.transpose()? else { break };

            match (&tuple.key.user, &subject_type) {
                // A typed wildcard admits every concrete subject of its
                // type.
                (UserRef::Wildcard { object_type }, Some(subject_type))
                    if object_type == subject_type =>
                {
                    return Ok(ResolveCheckResponse::new(true).with_query_count(query_count));
                }
                // Identity match for userset and wildcard callers.
                (user, None) if *user == req.tuple_key.user => {
                    return Ok(ResolveCheckResponse::new(true).with_query_count(query_count));
                }
                (UserRef::Userset { object, relation }, Some(_)) => {
                    dispatches.push(req.child(TupleKey::new(
                        object.clone(),
                        relation,
                        req.tuple_key.user.clone(),
                    )));
                }
                _ => {}
            }
        }
        drop(tuples);

        if dispatches.is_empty() {
            return Ok(ResolveCheckResponse::new(false).with_query_count(query_count));
        }
        self.dispatch_any(&req, dispatches, query_count).await
    }

    /// `computedUserset(R')`: the same question about `R'` on the same
    /// object, delegated so the sub-problem is cached.
    async fn check_computed_userset(
        self: Arc<Self>,
        req: ResolveCheckRequest,
        relation: &str,
    ) -> Result<ResolveCheckResponse> {
        let key = TupleKey::new(
            req.tuple_key.object.clone(),
            relation,
            req.tuple_key.user.clone(),
        );
        self.dispatcher()?.resolve_check(req.child(key)).await
    }

    /// `tupleToUserset(tupleset, computed)`: follow the tupleset relation
    /// to linked objects, then ask about `computed` on each of them.
    async fn check_tuple_to_userset(
        self: Arc<Self>,
        req: ResolveCheckRequest,
        reader: Arc<dyn TupleReader>,
        tupleset: RelationRef,
        computed: RelationRef,
    ) -> Result<ResolveCheckResponse> {
        let object_type = req.tuple_key.object.object_type.clone();
        let restrictions = self
            .typesystem
            .directly_related_user_types(&object_type, &tupleset.relation)?
            .to_vec();

        let query_count = 1u32;
        let filter = ReadUsersetTuplesFilter {
            object: req.tuple_key.object.clone(),
            relation: tupleset.relation.clone(),
            allowed_user_type_restrictions: restrictions,
        };
        let mut tuples = reader.read_userset_tuples(&req.store_id, filter).await?;

        let mut dispatches = Vec::new();
        loop {
            let item = tokio::select! {
                _ = req.cancellation.cancelled() => return Err(CheckError::Cancelled),
                item = tuples.next() => item,
            };
            let Some(tuple) = item.transpose()? else { break };

            // The tupleset relation yields objects; a wildcard cannot name
            // one.
            let target = match tuple.key.user {
                UserRef::Object(object) => object,
                UserRef::Userset { object, .. } => object,
                UserRef::Wildcard { .. } => continue,
            };
            dispatches.push(req.child(TupleKey::new(
                target,
                &computed.relation,
                req.tuple_key.user.clone(),
            )));
        }
        drop(tuples);

        if dispatches.is_empty() {
            return Ok(ResolveCheckResponse::new(false).with_query_count(query_count));
        }
        self.dispatch_any(&req, dispatches, query_count).await
    }

    /// Race same-level rewrite children of a union or intersection.
    async fn evaluate_children(
        self: Arc<Self>,
        req: ResolveCheckRequest,
        reader: Arc<dyn TupleReader>,
        children: Vec<Rewrite>,
        mode: RaceMode,
    ) -> Result<ResolveCheckResponse> {
        if children.is_empty() {
            return Ok(ResolveCheckResponse::new(matches!(mode, RaceMode::All)));
        }
        let scope = req.cancellation.child_token();
        let futures: Vec<BoxFuture<'static, Result<ResolveCheckResponse>>> = children
            .into_iter()
            .map(|child| {
                self.clone().check_rewrite(
                    req.clone().with_cancellation(scope.clone()),
                    reader.clone(),
                    child,
                )
            })
            .collect();
        self.race_children(scope, futures, mode, 0).await
    }

    /// Union-style race over sub-requests re-entering through the
    /// delegate.
    async fn dispatch_any(
        self: &Arc<Self>,
        parent: &ResolveCheckRequest,
        requests: Vec<ResolveCheckRequest>,
        base_count: u32,
    ) -> Result<ResolveCheckResponse> {
        let dispatcher = self.dispatcher()?;
        let scope = parent.cancellation.child_token();
        let children: Vec<BoxFuture<'static, Result<ResolveCheckResponse>>> = requests
            .into_iter()
            .map(|sub| {
                let dispatcher = dispatcher.clone();
                let sub = sub.with_cancellation(scope.clone());
                let fut: BoxFuture<'static, Result<ResolveCheckResponse>> =
                    Box::pin(async move { dispatcher.resolve_check(sub).await });
                fut
            })
            .collect();
        self.race_children(scope, children, RaceMode::Any, base_count)
            .await
    }

    /// Fan children out under the concurrency limiter and consume results
    /// as they complete. A decisive answer cancels the shared scope and
    /// aborts the stragglers. Cancelled and depth-exceeded children are
    /// held back and only surfaced when no sibling decides; any other
    /// error aborts the race immediately.
    async fn race_children(
        &self,
        scope: CancellationToken,
        children: Vec<BoxFuture<'static, Result<ResolveCheckResponse>>>,
        mode: RaceMode,
        base_count: u32,
    ) -> Result<ResolveCheckResponse> {
        let decisive = |allowed: bool| match mode {
            RaceMode::Any => allowed,
            RaceMode::All => !allowed,
        };

        let mut set: JoinSet<Result<ResolveCheckResponse>> = JoinSet::new();
        let mut inline = Vec::new();
        for child in children {
            match self.concurrency.clone().try_acquire_owned() {
                Ok(permit) => {
                    set.spawn(async move {
                        let _permit = permit;
                        child.await
                    });
                }
                // Limiter saturated: this child runs on the parent task.
                Err(_) => inline.push(child),
            }
        }

        let mut query_count = base_count;
        let mut deferred: Option<CheckError> = None;

        let settle = |result: Result<ResolveCheckResponse>,
                          query_count: &mut u32,
                          deferred: &mut Option<CheckError>|
         -> Option<Result<ResolveCheckResponse>> {
            match result {
                Ok(resp) => {
                    *query_count += resp.resolution_metadata.datastore_query_count;
                    decisive(resp.allowed).then(|| {
                        Ok(ResolveCheckResponse::new(resp.allowed).with_query_count(*query_count))
                    })
                }
                Err(err) if err.is_absorbable() => {
                    if deferred.is_none() {
                        *deferred = Some(err);
                    }
                    None
                }
                Err(err) => Some(Err(err)),
            }
        };

        while let Some(joined) = set.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(err) if err.is_cancelled() => continue,
                Err(err) => {
                    scope.cancel();
                    set.abort_all();
                    return Err(CheckError::Internal(format!("sub-check task failed: {err}")));
                }
            };
            if let Some(outcome) = settle(result, &mut query_count, &mut deferred) {
                scope.cancel();
                set.abort_all();
                return outcome;
            }
        }

        for child in inline {
            if let Some(outcome) = settle(child.await, &mut query_count, &mut deferred) {
                scope.cancel();
                return outcome;
            }
        }

        if let Some(err) = deferred {
            return Err(err);
        }
        Ok(ResolveCheckResponse::new(matches!(mode, RaceMode::All)).with_query_count(query_count))
    }

    /// `difference(base, subtract)`: allowed iff base allows and subtract
    /// does not. Either side's negative outcome cancels the other.
    async fn check_difference(
        self: Arc<Self>,
        req: ResolveCheckRequest,
        reader: Arc<dyn TupleReader>,
        base: Rewrite,
        subtract: Rewrite,
    ) -> Result<ResolveCheckResponse> {
        let scope = req.cancellation.child_token();
        let base_fut = self.clone().check_rewrite(
            req.clone().with_cancellation(scope.clone()),
            reader.clone(),
            base,
        );
        let subtract_fut = self.clone().check_rewrite(
            req.clone().with_cancellation(scope.clone()),
            reader,
            subtract,
        );

        let mut query_count = 0u32;
        let mut deferred: Option<CheckError> = None;
        let mut base_allowed: Option<bool> = None;
        let mut subtract_allowed: Option<bool> = None;

        let first_permit = self.concurrency.clone().try_acquire_owned();
        let second_permit = self.concurrency.clone().try_acquire_owned();
        if let (Ok(first), Ok(second)) = (first_permit, second_permit) {
            let mut set: JoinSet<(bool, Result<ResolveCheckResponse>)> = JoinSet::new();
            set.spawn(async move {
                let _permit = first;
                (true, base_fut.await)
            });
            set.spawn(async move {
                let _permit = second;
                (false, subtract_fut.await)
            });

            while let Some(joined) = set.join_next().await {
                let (is_base, result) = match joined {
                    Ok(pair) => pair,
                    Err(err) if err.is_cancelled() => continue,
                    Err(err) => {
                        scope.cancel();
                        set.abort_all();
                        return Err(CheckError::Internal(format!(
                            "sub-check task failed: {err}"
                        )));
                    }
                };
                match result {
                    Ok(resp) => {
                        query_count += resp.resolution_metadata.datastore_query_count;
                        if is_base {
                            base_allowed = Some(resp.allowed);
                        } else {
                            subtract_allowed = Some(resp.allowed);
                        }
                    }
                    Err(err) if err.is_absorbable() => {
                        if deferred.is_none() {
                            deferred = Some(err);
                        }
                    }
                    Err(err) => {
                        scope.cancel();
                        set.abort_all();
                        return Err(err);
                    }
                }
                if base_allowed == Some(false) || subtract_allowed == Some(true) {
                    scope.cancel();
                    set.abort_all();
                    return Ok(ResolveCheckResponse::new(false).with_query_count(query_count));
                }
            }
        } else {
            // Limiter saturated: evaluate in place, base first since a
            // negative base decides without touching subtract.
            match base_fut.await {
                Ok(resp) => {
                    query_count += resp.resolution_metadata.datastore_query_count;
                    base_allowed = Some(resp.allowed);
                }
                Err(err) if err.is_absorbable() => deferred = Some(err),
                Err(err) => return Err(err),
            }
            if base_allowed == Some(false) {
                return Ok(ResolveCheckResponse::new(false).with_query_count(query_count));
            }
            match subtract_fut.await {
                Ok(resp) => {
                    query_count += resp.resolution_metadata.datastore_query_count;
                    subtract_allowed = Some(resp.allowed);
                }
                Err(err) if err.is_absorbable() => {
                    if deferred.is_none() {
                        deferred = Some(err);
                    }
                }
                Err(err) => return Err(err),
            }
            if subtract_allowed == Some(true) {
                return Ok(ResolveCheckResponse::new(false).with_query_count(query_count));
            }
        }

        match (base_allowed, subtract_allowed) {
            (Some(true), Some(false)) => {
                Ok(ResolveCheckResponse::new(true).with_query_count(query_count))
            }
            _ => Err(deferred.unwrap_or_else(|| {
                CheckError::Internal("difference resolved without an outcome".to_string())
            })),
        }
    }
}

#[async_trait]
impl CheckResolver for LocalChecker {
    async fn resolve_check(&self, req: ResolveCheckRequest) -> Result<ResolveCheckResponse> {
        if req.cancellation.is_cancelled() {
            return Err(CheckError::Cancelled);
        }
        if req.resolution_depth >= self.resolution_depth_limit {
            return Err(CheckError::ResolutionDepthExceeded);
        }
        if req.model_id != self.typesystem.model_id() {
            return Err(CheckError::InvalidModel(format!(
                "request names model {} but {} is loaded",
                req.model_id,
                self.typesystem.model_id()
            )));
        }

        let rewrite = self
            .typesystem
            .rewrite(&req.tuple_key.object.object_type, &req.tuple_key.relation)?
            .clone();

        debug!(depth = req.resolution_depth, tuple = %req.tuple_key, "resolving check");

        let reader: Arc<dyn TupleReader> = Arc::new(ContextualTupleReader::new(
            self.datastore.clone(),
            &req.contextual_tuples,
        ));
        self.strong()?.check_rewrite(req, reader, rewrite).await
    }
}
