use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::types;

use super::errors::PolicyError;
use super::rbac::{self, Rbac};
use super::{Condition, ConditionRelationshipAction, ConditionRoleBindingV2, PolicyDocument};

/// The normalized, validated form of a policy document. Immutable once
/// compiled; a changed document requires a fresh compile.
#[derive(Debug)]
pub struct Policy {
    resource_types: Vec<types::ResourceType>,
    unions: Vec<ExpandedUnion>,
    actions: BTreeSet<String>,
    prefixes: BTreeMap<String, String>,
    rbac: Option<Rbac>,
}

/// A union after validation: its name and the concrete member types it
/// expands to.
#[derive(Debug, Clone)]
pub struct ExpandedUnion {
    pub name: String,
    pub members: Vec<String>,
}

impl Policy {
    /// Validate and normalize a policy document.
    pub fn compile(doc: PolicyDocument) -> Result<Self, PolicyError> {
        let mut compiler = Compiler::default();

        compiler.index_types(&doc)?;
        compiler.index_unions(&doc)?;
        compiler.check_relationships()?;
        compiler.collect_actions(&doc);
        compiler.attach_bindings(&doc)?;
        if let Some(cfg) = doc.rbac.clone() {
            compiler.expand_rbac(cfg)?;
        }
        compiler.rewrite_binding_markers()?;

        let resource_types = compiler.normalize()?;

        let mut prefixes = BTreeMap::new();
        for rt in &resource_types {
            if !rt.id_prefix.is_empty() {
                prefixes.insert(rt.id_prefix.clone(), rt.name.clone());
            }
        }

        let unions = compiler
            .unions
            .iter()
            .map(|(name, members)| ExpandedUnion {
                name: name.clone(),
                members: members.clone(),
            })
            .collect();

        Ok(Self {
            resource_types,
            unions,
            actions: compiler.actions,
            prefixes,
            rbac: compiler.rbac,
        })
    }

    /// Flattened resource types in emission order.
    pub fn resource_types(&self) -> &[types::ResourceType] {
        &self.resource_types
    }

    pub fn rbac(&self) -> Option<&Rbac> {
        self.rbac.as_ref()
    }

    pub fn unions(&self) -> &[ExpandedUnion] {
        &self.unions
    }

    pub fn actions(&self) -> &BTreeSet<String> {
        &self.actions
    }

    /// Resolve an id prefix to the resource type it identifies.
    pub fn type_name_for_prefix(&self, prefix: &str) -> Option<&str> {
        self.prefixes.get(prefix).map(String::as_str)
    }

    pub fn resource_type(&self, name: &str) -> Option<&types::ResourceType> {
        self.resource_types.iter().find(|rt| rt.name == name)
    }
}

/// Working state while a document is compiled. Types keep their document
/// order; everything synthesized is appended.
#[derive(Default)]
struct Compiler {
    work: Vec<WorkType>,
    index: HashMap<String, usize>,
    unions: BTreeMap<String, Vec<String>>,
    actions: BTreeSet<String>,
    rbac: Option<Rbac>,
    group_types: BTreeSet<String>,
    bindable: Vec<String>,
}

struct WorkType {
    name: String,
    id_prefix: String,
    relationships: Vec<WorkRelationship>,
    /// action name -> document conditions, merged across bindings
    bindings: BTreeMap<String, Vec<Condition>>,
    v2_config: Option<super::RoleBindingV2Config>,
}

struct WorkRelationship {
    relation: String,
    targets: Vec<types::TargetType>,
}

impl Compiler {
    fn index_types(&mut self, doc: &PolicyDocument) -> Result<(), PolicyError> {
        for rt in &doc.resource_types {
            let relationships = rt
                .relationships
                .iter()
                .map(|rel| WorkRelationship {
                    relation: rel.relation.clone(),
                    targets: rel
                        .target_types
                        .iter()
                        .map(|t| types::TargetType {
                            name: t.name.clone(),
                            subject_identifier: None,
                            subject_relation: t.subject_relation.clone(),
                        })
                        .collect(),
                })
                .collect();

            self.push_type(WorkType {
                name: rt.name.clone(),
                id_prefix: rt.id_prefix.clone(),
                relationships,
                bindings: BTreeMap::new(),
                v2_config: rt.role_binding_v2.clone(),
            })?;
        }
        Ok(())
    }

    fn index_unions(&mut self, doc: &PolicyDocument) -> Result<(), PolicyError> {
        for union in &doc.unions {
            if self.index.contains_key(&union.name) || self.unions.contains_key(&union.name) {
                return Err(PolicyError::TypeExists(union.name.clone()));
            }
            for member in &union.resource_type_names {
                if !self.index.contains_key(member) {
                    return Err(PolicyError::UnknownType(member.clone()));
                }
            }
            self.unions
                .insert(union.name.clone(), union.resource_type_names.clone());
        }
        Ok(())
    }

    /// Every relationship target must name a declared type or union, and a
    /// userset target must name a relation its type declares.
    fn check_relationships(&self) -> Result<(), PolicyError> {
        for wt in &self.work {
            for rel in &wt.relationships {
                for target in &rel.targets {
                    if !self.index.contains_key(&target.name)
                        && !self.unions.contains_key(&target.name)
                    {
                        return Err(PolicyError::UnknownType(target.name.clone()));
                    }
                    if let Some(sr) = &target.subject_relation {
                        for member in self.resolve_members(&target.name) {
                            if !self.has_relation(&member, sr) {
                                return Err(PolicyError::UnknownRelation {
                                    type_name: member,
                                    relation: sr.clone(),
                                });
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn collect_actions(&mut self, doc: &PolicyDocument) {
        for action in &doc.actions {
            self.actions.insert(action.name.clone());
        }
    }

    fn attach_bindings(&mut self, doc: &PolicyDocument) -> Result<(), PolicyError> {
        for binding in &doc.action_bindings {
            if !self.actions.contains(&binding.action_name) {
                return Err(PolicyError::UnknownAction {
                    type_name: binding.type_name.clone(),
                    action: binding.action_name.clone(),
                });
            }

            // a binding on a union applies to every member
            let targets = if let Some(members) = self.unions.get(&binding.type_name) {
                members.clone()
            } else if self.index.contains_key(&binding.type_name) {
                vec![binding.type_name.clone()]
            } else {
                return Err(PolicyError::UnknownType(binding.type_name.clone()));
            };

            for name in targets {
                let idx = self.index[&name];
                self.work[idx]
                    .bindings
                    .entry(binding.action_name.clone())
                    .or_default()
                    .extend(binding.conditions.iter().cloned());
            }
        }
        Ok(())
    }

    fn expand_rbac(&mut self, cfg: Rbac) -> Result<(), PolicyError> {
        if cfg.role_owners.is_empty() {
            return Err(PolicyError::InvalidRbacConfig(
                "at least one role owner must be configured".to_string(),
            ));
        }
        for owner in &cfg.role_owners {
            if !self.index.contains_key(owner) {
                return Err(PolicyError::UnknownType(owner.clone()));
            }
        }
        for name in [&cfg.role_resource.name, &cfg.role_binding_resource.name] {
            if self.index.contains_key(name) || self.unions.contains_key(name) {
                return Err(PolicyError::TypeExists(name.clone()));
            }
        }

        // subject types referenced but not declared become empty definitions;
        // userset subjects (group#member) get the membership shape
        for subject in cfg.role_subject_types.clone() {
            self.ensure_subject_type(&subject)?;
        }
        for subject in cfg.role_binding_subjects.clone() {
            if self.index.contains_key(&subject.name) {
                if let Some(sr) = &subject.subject_relation {
                    if !self.has_relation(&subject.name, sr) {
                        return Err(PolicyError::UnknownRelation {
                            type_name: subject.name.clone(),
                            relation: sr.clone(),
                        });
                    }
                }
            } else if subject.subject_relation.is_some() {
                self.synthesize_group(&subject.name, &cfg)?;
            } else {
                self.ensure_subject_type(&subject.name)?;
            }
        }

        // the role resource: owned by role owners, carrying one wildcard
        // action relation per policy action
        let mut role_rels = vec![WorkRelationship {
            relation: rbac::ROLE_OWNER_RELATION.to_string(),
            targets: cfg
                .role_owners
                .iter()
                .map(|o| types::TargetType::named(o.clone()))
                .collect(),
        }];
        for action in &self.actions {
            role_rels.push(WorkRelationship {
                relation: rbac::action_relation(action),
                targets: cfg
                    .role_subject_types
                    .iter()
                    .map(|s| types::TargetType::wildcard(s.clone()))
                    .collect(),
            });
        }
        self.push_type(WorkType {
            name: cfg.role_resource.name.clone(),
            id_prefix: cfg.role_resource.id_prefix.clone(),
            relationships: role_rels,
            bindings: BTreeMap::new(),
            v2_config: None,
        })?;

        // types role bindings may attach to, in document order
        let bindable: Vec<String> = self
            .work
            .iter()
            .filter(|wt| {
                cfg.role_owners.contains(&wt.name)
                    || self.group_types.contains(&wt.name)
                    || wt.v2_config.is_some()
            })
            .map(|wt| wt.name.clone())
            .collect();

        // the role binding resource: the v2 condition ANDs the bound subject
        // with the role's action relation
        let mut rb_bindings = BTreeMap::new();
        for action in &self.actions {
            rb_bindings.insert(
                action.clone(),
                vec![Condition {
                    relationship_action: Some(ConditionRelationshipAction {
                        relation: rbac::ROLE_BINDING_ROLE_RELATION.to_string(),
                        action_name: Some(rbac::action_relation(action)),
                    }),
                    role_binding: None,
                    role_binding_v2: Some(ConditionRoleBindingV2 {}),
                }],
            );
        }
        self.push_type(WorkType {
            name: cfg.role_binding_resource.name.clone(),
            id_prefix: cfg.role_binding_resource.id_prefix.clone(),
            relationships: vec![
                WorkRelationship {
                    relation: rbac::ROLE_BINDING_ROLE_RELATION.to_string(),
                    targets: vec![types::TargetType::named(cfg.role_resource.name.clone())],
                },
                WorkRelationship {
                    relation: rbac::ROLE_BINDING_SUBJECT_RELATION.to_string(),
                    targets: cfg
                        .role_binding_subjects
                        .iter()
                        .map(|t| types::TargetType {
                            name: t.name.clone(),
                            subject_identifier: None,
                            subject_relation: t.subject_relation.clone(),
                        })
                        .collect(),
                },
                WorkRelationship {
                    relation: rbac::ROLE_BINDING_PARENT_RELATION.to_string(),
                    targets: bindable
                        .iter()
                        .map(|n| types::TargetType::named(n.clone()))
                        .collect(),
                },
            ],
            bindings: rb_bindings,
            v2_config: None,
        })?;

        // every bindable type gains the grant relation; owners and groups get
        // the full action set through the marker rewrite
        for name in &bindable {
            let idx = self.index[name];
            let standing = cfg.role_owners.contains(name)
                || self.group_types.contains(name)
                || self.work[idx]
                    .v2_config
                    .as_ref()
                    .is_some_and(|c| c.inherit_all_actions);

            let wt = &mut self.work[idx];
            wt.relationships.push(WorkRelationship {
                relation: rbac::GRANT_RELATION.to_string(),
                targets: vec![types::TargetType::named(
                    cfg.role_binding_resource.name.clone(),
                )],
            });

            if standing {
                for action in self.actions.clone() {
                    let conditions = self.work[idx].bindings.entry(action).or_default();
                    let has_marker = conditions
                        .iter()
                        .any(|c| c.role_binding_v2.is_some() && c.relationship_action.is_none());
                    if !has_marker {
                        conditions.push(Condition {
                            relationship_action: None,
                            role_binding: None,
                            role_binding_v2: Some(ConditionRoleBindingV2 {}),
                        });
                    }
                }
            }
        }

        self.bindable = bindable;
        self.rbac = Some(cfg);
        Ok(())
    }

    /// Replace every bare v2 marker with the grant walk plus the inherited
    /// walks the type is configured for.
    fn rewrite_binding_markers(&mut self) -> Result<(), PolicyError> {
        let bindable: BTreeSet<String> = self.bindable.iter().cloned().collect();

        for idx in 0..self.work.len() {
            let vias = self.inherit_relations(idx);
            let wt = &mut self.work[idx];
            let is_bindable = bindable.contains(&wt.name);

            for (action, conditions) in wt.bindings.iter_mut() {
                let mut rewritten = Vec::with_capacity(conditions.len());
                for condition in conditions.drain(..) {
                    let bare_marker = condition.role_binding_v2.is_some()
                        && condition.relationship_action.is_none();
                    if !bare_marker {
                        rewritten.push(condition);
                        continue;
                    }
                    if !is_bindable {
                        return Err(PolicyError::InvalidCondition {
                            type_name: wt.name.clone(),
                            action: action.clone(),
                            reason: "type has no grant relationship".to_string(),
                        });
                    }
                    rewritten.push(walk_condition(rbac::GRANT_RELATION, action));
                    for via in &vias {
                        rewritten.push(walk_condition(via, action));
                    }
                }
                *conditions = rewritten;
            }
        }
        Ok(())
    }

    /// Relations an action is inherited through: the explicit v2 config, or
    /// the type's own `parent` relation for owners and groups.
    fn inherit_relations(&self, idx: usize) -> Vec<String> {
        let wt = &self.work[idx];
        if let Some(cfg) = &wt.v2_config {
            return cfg.inherit_permissions_from.clone();
        }
        if self.has_relation(&wt.name, rbac::ROLE_BINDING_PARENT_RELATION) {
            return vec![rbac::ROLE_BINDING_PARENT_RELATION.to_string()];
        }
        Vec::new()
    }

    fn normalize(&self) -> Result<Vec<types::ResourceType>, PolicyError> {
        let mut order: Vec<usize> = (0..self.work.len()).collect();

        if let Some(cfg) = &self.rbac {
            let bucket = |wt: &WorkType| -> u8 {
                if wt.name == cfg.role_resource.name {
                    2
                } else if wt.name == cfg.role_binding_resource.name {
                    3
                } else if self.group_types.contains(&wt.name) {
                    4
                } else if cfg.role_owners.contains(&wt.name) {
                    5
                } else if wt.relationships.is_empty() && wt.bindings.is_empty() {
                    1
                } else {
                    6
                }
            };
            order.sort_by(|&a, &b| {
                let (wa, wb) = (&self.work[a], &self.work[b]);
                let (ba, bb) = (bucket(wa), bucket(wb));
                ba.cmp(&bb).then_with(|| {
                    if ba == 6 {
                        wa.name.cmp(&wb.name)
                    } else {
                        a.cmp(&b)
                    }
                })
            });
        }

        let mut out = Vec::with_capacity(order.len());
        for idx in order {
            let wt = &self.work[idx];

            let relationships = wt
                .relationships
                .iter()
                .map(|rel| types::Relationship {
                    relation: rel.relation.clone(),
                    targets: self.expand_targets(&rel.targets),
                })
                .collect();

            let mut actions = Vec::with_capacity(wt.bindings.len());
            for (action, conditions) in &wt.bindings {
                let mut normalized: Vec<types::Condition> = Vec::new();
                for condition in conditions {
                    let nc = self.normalize_condition(wt, action, condition)?;
                    if !normalized.contains(&nc) {
                        normalized.push(nc);
                    }
                }
                actions.push(types::Action {
                    name: action.clone(),
                    conditions: normalized,
                });
            }

            out.push(types::ResourceType {
                name: wt.name.clone(),
                id_prefix: wt.id_prefix.clone(),
                relationships,
                actions,
            });
        }
        Ok(out)
    }

    fn normalize_condition(
        &self,
        wt: &WorkType,
        action: &str,
        condition: &Condition,
    ) -> Result<types::Condition, PolicyError> {
        let Some(ra) = &condition.relationship_action else {
            let reason = if condition.role_binding.is_some() {
                "role binding condition requires a relationship"
            } else if condition.role_binding_v2.is_some() {
                "type has no grant relationship"
            } else {
                "condition has no variants"
            };
            return Err(PolicyError::InvalidCondition {
                type_name: wt.name.clone(),
                action: action.to_string(),
                reason: reason.to_string(),
            });
        };

        self.check_relationship_action(wt, ra)?;

        let normalized = types::RelationshipAction {
            relation: ra.relation.clone(),
            action_name: ra.action_name.clone(),
        };
        if condition.role_binding_v2.is_some() {
            Ok(types::Condition::RoleBindingV2(normalized))
        } else if condition.role_binding.is_some() {
            Ok(types::Condition::RoleBindingV1(normalized))
        } else {
            Ok(types::Condition::RelationshipAction(normalized))
        }
    }

    fn check_relationship_action(
        &self,
        wt: &WorkType,
        ra: &ConditionRelationshipAction,
    ) -> Result<(), PolicyError> {
        let rel = wt
            .relationships
            .iter()
            .find(|r| r.relation == ra.relation)
            .ok_or_else(|| PolicyError::UnknownRelation {
                type_name: wt.name.clone(),
                relation: ra.relation.clone(),
            })?;

        let Some(walked) = &ra.action_name else {
            return Ok(());
        };

        // every target must grant the walked action, through a binding of its
        // own or by declaring a relation of that name
        for target in &rel.targets {
            for member in self.resolve_members(&target.name) {
                let target_type = &self.work[self.index[&member]];
                let grants = target_type.bindings.contains_key(walked)
                    || target_type
                        .relationships
                        .iter()
                        .any(|r| r.relation == *walked);
                if !grants {
                    return Err(PolicyError::UnknownAction {
                        type_name: member,
                        action: walked.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Expand union targets to their member types, preserving wildcard and
    /// userset annotations.
    fn expand_targets(&self, targets: &[types::TargetType]) -> Vec<types::TargetType> {
        let mut out = Vec::with_capacity(targets.len());
        for target in targets {
            match self.unions.get(&target.name) {
                Some(members) => {
                    for member in members {
                        out.push(types::TargetType {
                            name: member.clone(),
                            subject_identifier: target.subject_identifier.clone(),
                            subject_relation: target.subject_relation.clone(),
                        });
                    }
                }
                None => out.push(target.clone()),
            }
        }
        out
    }

    fn resolve_members(&self, name: &str) -> Vec<String> {
        match self.unions.get(name) {
            Some(members) => members.clone(),
            None => vec![name.to_string()],
        }
    }

    fn has_relation(&self, type_name: &str, relation: &str) -> bool {
        self.index
            .get(type_name)
            .map(|&idx| {
                self.work[idx]
                    .relationships
                    .iter()
                    .any(|r| r.relation == relation)
            })
            .unwrap_or(false)
    }

    fn push_type(&mut self, wt: WorkType) -> Result<(), PolicyError> {
        if self.index.contains_key(&wt.name) || self.unions.contains_key(&wt.name) {
            return Err(PolicyError::TypeExists(wt.name.clone()));
        }
        self.index.insert(wt.name.clone(), self.work.len());
        self.work.push(wt);
        Ok(())
    }

    fn ensure_subject_type(&mut self, name: &str) -> Result<(), PolicyError> {
        if self.index.contains_key(name) {
            return Ok(());
        }
        self.push_type(WorkType {
            name: name.to_string(),
            id_prefix: String::new(),
            relationships: Vec::new(),
            bindings: BTreeMap::new(),
            v2_config: None,
        })
    }

    /// A userset binding subject that was never declared gets the membership
    /// shape: members, a parent hierarchy over itself and the role owners,
    /// and (via the bindable set) a grant relation.
    fn synthesize_group(&mut self, name: &str, cfg: &Rbac) -> Result<(), PolicyError> {
        let member_relation = cfg
            .role_binding_subjects
            .iter()
            .find(|t| t.name == name)
            .and_then(|t| t.subject_relation.clone())
            .unwrap_or_else(|| "member".to_string());

        let mut parent_targets = vec![types::TargetType::named(name.to_string())];
        parent_targets.extend(
            cfg.role_owners
                .iter()
                .map(|o| types::TargetType::named(o.clone())),
        );

        self.push_type(WorkType {
            name: name.to_string(),
            id_prefix: String::new(),
            relationships: vec![
                WorkRelationship {
                    relation: member_relation,
                    targets: cfg
                        .role_binding_subjects
                        .iter()
                        .map(|t| types::TargetType {
                            name: t.name.clone(),
                            subject_identifier: None,
                            subject_relation: t.subject_relation.clone(),
                        })
                        .collect(),
                },
                WorkRelationship {
                    relation: rbac::ROLE_BINDING_PARENT_RELATION.to_string(),
                    targets: parent_targets,
                },
            ],
            bindings: BTreeMap::new(),
            v2_config: None,
        })?;
        self.group_types.insert(name.to_string());
        Ok(())
    }
}

fn walk_condition(relation: &str, action: &str) -> Condition {
    Condition {
        relationship_action: Some(ConditionRelationshipAction {
            relation: relation.to_string(),
            action_name: Some(action.to_string()),
        }),
        role_binding: None,
        role_binding_v2: None,
    }
}
