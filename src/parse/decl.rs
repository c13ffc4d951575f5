use std::convert::TryFrom;
use std::rc::Rc;

use super::Lexer;
use crate::data::{
    ir::{BlockId, Value, Var, VarKind},
    types::{ArrayLength, FunctionType, Member, ObjectDef, ObjectType, Qualifiers, TagRef, Type},
    CompileResult, Keyword, SemanticError, StorageClass, SyntaxError, Token, Warning,
};
use crate::intern::InternedStr;
use crate::symbol::{Linkage, Symbol, SymbolKind};

/// The result of parsing a specifier sequence: a base type, the declaration
/// qualifiers, and at most one storage class.
#[derive(Debug)]
pub(crate) struct DeclSpecifiers {
    pub(crate) ctype: Type,
    pub(crate) qualifiers: Qualifiers,
    pub(crate) storage: Option<StorageClass>,
}

/// One syntactic layer of a declarator, in the order the layers apply to the
/// base type. `int *a[3]` yields `[Pointer, Array(3), Name(a)]`: the pointer
/// wraps `int` first, then the array wraps the pointer.
#[derive(Debug)]
enum DeclaratorStep {
    Name(InternedStr),
    Pointer(Qualifiers),
    Array(ArrayLength),
    Function { params: Vec<Member>, varargs: bool },
}

impl<I: Lexer> super::Parser<I> {
    /// ```yacc
    /// declaration
    /// : declaration_specifiers ';'
    /// | declaration_specifiers init_declarator_list ';'
    /// | declaration_specifiers declarator compound_statement
    /// ;
    /// ```
    /// <http://www.quut.com/c/ANSI-C-grammar-y.html#declaration>
    ///
    /// Covers external declarations, function definitions, and local
    /// declarations (with optional initialization code) inside functions.
    pub(crate) fn declaration(&mut self, cursor: &mut BlockId) -> CompileResult<()> {
        let specs = match self.declaration_specifiers(true)? {
            Some(specs) => specs,
            // implicit int
            None => DeclSpecifiers {
                ctype: Type::int(),
                qualifiers: Qualifiers::NONE,
                storage: None,
            },
        };
        let (kind, linkage) = match specs.storage {
            Some(StorageClass::Extern) => (SymbolKind::Declaration, Linkage::External),
            Some(StorageClass::Static) => (SymbolKind::Tentative, Linkage::Internal),
            Some(StorageClass::Typedef) => (SymbolKind::Typedef, Linkage::None),
            Some(StorageClass::Auto) | Some(StorageClass::Register) | None => {
                if self.identifiers.current_depth() == 0 {
                    (SymbolKind::Tentative, Linkage::External)
                } else {
                    (SymbolKind::Definition, Linkage::None)
                }
            }
        };

        loop {
            let (ctype, name) = self.declarator(specs.ctype.clone())?;
            let name = match name {
                Some(name) => name,
                // just a specifier, like `struct s { int i; };`
                None => {
                    self.expect(Token::Semicolon)?;
                    return Ok(());
                }
            };

            let mut proto = Symbol::new(name, ctype.clone(), kind, linkage);
            proto.qualifiers = specs.qualifiers;
            let sym = self.identifiers.add(proto)?;
            if self.identifiers.current_depth() > 0 {
                self.decl.locals.push(sym);
            }

            match self.peek_token() {
                Some(Token::Semicolon) => {
                    self.next_token();
                    return Ok(());
                }
                Some(Token::Equal) => {
                    if sym.map(|s| s.kind) == SymbolKind::Declaration {
                        return Err(SemanticError::ExternInitializer(name).into());
                    }
                    if sym.map(|s| s.depth == 0 && s.kind == SymbolKind::Definition) {
                        return Err(SemanticError::Redefinition(name).into());
                    }
                    self.next_token();
                    sym.update(|s| s.kind = SymbolKind::Definition);
                    // static storage is initialized before execution, in the
                    // fragment's head; everything else initializes in place
                    if sym.map(|s| s.depth == 0 || s.linkage == Linkage::Internal) {
                        let mut head = self.decl.head;
                        self.initializer(&mut head, Var::direct(sym))?;
                        self.decl.head = head;
                    } else {
                        self.initializer(cursor, Var::direct(sym))?;
                    }
                    if self.peek_token() != Some(&Token::Comma) {
                        self.expect(Token::Semicolon)?;
                        return Ok(());
                    }
                }
                Some(Token::LeftBrace) => {
                    if !ctype.is_function() || sym.map(|s| s.depth) != 0 {
                        return Err(SemanticError::InvalidFunctionDefinition.into());
                    }
                    if sym.map(|s| s.kind) == SymbolKind::Definition {
                        return Err(SemanticError::Redefinition(name).into());
                    }
                    sym.update(|s| s.kind = SymbolKind::Definition);
                    self.decl.fun = Some(sym);

                    self.identifiers.push_scope();
                    self.labels.push_scope();
                    self.define_builtin_func(name)?;
                    // use the fresh declarator for parameter names: a prior
                    // prototype may have declared them differently or not at all
                    let ftype = match &ctype {
                        Type::Function(ftype) => ftype,
                        _ => unreachable!("checked above"),
                    };
                    for (i, param) in ftype.params.iter().enumerate() {
                        if param.name == InternedStr::default() {
                            return Err(SemanticError::MissingParamName(i + 1).into());
                        }
                        let param_sym = self.identifiers.add(Symbol::new(
                            param.name,
                            param.ctype.clone(),
                            SymbolKind::Definition,
                            Linkage::None,
                        ))?;
                        self.decl.params.push(param_sym);
                    }
                    self.compound_statement(cursor)?;
                    self.labels.pop_scope();
                    self.identifiers.pop_scope();
                    return Ok(());
                }
                _ => {}
            }
            self.expect(Token::Comma)?;
        }
    }

    /// C99: define `__func__` as `static const char __func__[] = "<name>";`
    fn define_builtin_func(&mut self, name: InternedStr) -> CompileResult<()> {
        debug_assert_eq!(self.identifiers.current_depth(), 1);
        let string = Var::string(name, name.len() as u64 + 1);
        let mut proto = Symbol::new(
            "__func__".into(),
            string.ctype.clone(),
            SymbolKind::Definition,
            Linkage::Internal,
        );
        proto.qualifiers = Qualifiers {
            c_const: true,
            volatile: false,
        };
        let func = self.identifiers.add(proto)?;
        let head = self.decl.head;
        self.eval().assign(head, Var::direct(func), string)?;
        Ok(())
    }

    /// Parse type, storage class and qualifiers, in any order. The type
    /// defaults to `int` when only qualifiers are seen.
    ///
    /// Returns `Ok(None)` if no specifier token at all was consumed, so a
    /// two-token-lookahead caller (cast expressions) can back out.
    pub(crate) fn declaration_specifiers(
        &mut self,
        allow_storage: bool,
    ) -> CompileResult<Option<DeclSpecifiers>> {
        let mut consumed = false;
        let mut qualifiers = Qualifiers::NONE;
        let mut storage = None;
        let mut base: Option<Type> = None;
        let mut unsigned = false;

        loop {
            let token = match self.peek_token() {
                Some(token) => token.clone(),
                None => break,
            };
            match token {
                Token::Keyword(Keyword::Const) => {
                    self.next_token();
                    qualifiers.c_const = true;
                }
                Token::Keyword(Keyword::Volatile) => {
                    self.next_token();
                    qualifiers.volatile = true;
                }
                Token::Keyword(keyword) if StorageClass::try_from(keyword).is_ok() => {
                    self.next_token();
                    if !allow_storage {
                        return Err(SemanticError::StorageClassNotAllowed.into());
                    }
                    if storage.is_some() {
                        return Err(SemanticError::ConflictingStorageClass.into());
                    }
                    storage = StorageClass::try_from(keyword).ok();
                }
                // a typedef-name, but only as the first type component
                Token::Id(name) => {
                    if base.is_some() || unsigned {
                        break;
                    }
                    match self.identifiers.lookup(name) {
                        Some(id) if id.map(|sym| sym.kind == SymbolKind::Typedef) => {
                            self.next_token();
                            base = Some(id.ctype());
                        }
                        _ => break,
                    }
                }
                Token::Keyword(Keyword::Char) => {
                    self.next_token();
                    base = Some(Type::char());
                }
                Token::Keyword(Keyword::Short) => {
                    self.next_token();
                    base = Some(Type::integer(crate::arch::SHORT_SIZE));
                }
                Token::Keyword(Keyword::Int) | Token::Keyword(Keyword::Signed) => {
                    self.next_token();
                    if base.is_none() {
                        base = Some(Type::int());
                    }
                }
                Token::Keyword(Keyword::Long) => {
                    self.next_token();
                    base = Some(Type::integer(crate::arch::LONG_SIZE));
                }
                Token::Keyword(Keyword::Unsigned) => {
                    self.next_token();
                    unsigned = true;
                }
                Token::Keyword(Keyword::Float) => {
                    self.next_token();
                    base = Some(Type::real(crate::arch::FLOAT_SIZE));
                }
                Token::Keyword(Keyword::Double) => {
                    self.next_token();
                    base = Some(Type::real(crate::arch::DOUBLE_SIZE));
                }
                Token::Keyword(Keyword::Void) => {
                    self.next_token();
                    base = Some(Type::Void);
                }
                Token::Keyword(Keyword::Struct) | Token::Keyword(Keyword::Union) => {
                    self.next_token();
                    base = Some(self.struct_specifier()?);
                }
                Token::Keyword(Keyword::Enum) => {
                    self.next_token();
                    base = Some(self.enum_specifier()?);
                }
                _ => break,
            }
            consumed = true;
        }

        if !consumed {
            return Ok(None);
        }
        let mut ctype = base.unwrap_or_else(Type::int);
        if unsigned {
            if let Type::Integer { size, .. } = ctype {
                ctype = Type::unsigned(size);
            }
        }
        Ok(Some(DeclSpecifiers {
            ctype,
            qualifiers,
            storage,
        }))
    }

    /// ```yacc
    /// struct_or_union_specifier
    /// : (struct | union) '{' struct_declaration + '}'
    /// | (struct | union) identifier '{' struct_declaration + '}'
    /// | (struct | union) identifier
    /// ;
    /// ```
    /// <http://www.quut.com/c/ANSI-C-grammar-y.html#struct_or_union_specifier>
    ///
    /// The `struct`/`union` keyword itself has already been consumed.
    fn struct_specifier(&mut self) -> CompileResult<Type> {
        let tag_name = match self.match_id() {
            Some(name) => name,
            None => {
                // anonymous: the definition travels with the type
                self.expect(Token::LeftBrace)?;
                let def = self.struct_body()?;
                self.expect(Token::RightBrace)?;
                return Ok(Type::Object(ObjectType::Anonymous(Rc::new(def))));
            }
        };

        let (ctype, tag) = match self.tags.lookup(tag_name) {
            Some(id) => {
                let ctype = id.ctype();
                match &ctype {
                    Type::Object(ObjectType::Named(_, tag)) => {
                        let tag = *tag;
                        (ctype, tag)
                    }
                    _ => return Err(SemanticError::TagMismatch(tag_name).into()),
                }
            }
            None => {
                let tag = TagRef::new();
                let ctype = Type::Object(ObjectType::Named(tag_name, tag));
                self.tags.add(Symbol::new(
                    tag_name,
                    ctype.clone(),
                    SymbolKind::Typedef,
                    Linkage::None,
                ))?;
                (ctype, tag)
            }
        };

        if self.peek_token() == Some(&Token::LeftBrace) {
            if ctype.size() != 0 {
                return Err(SemanticError::TagRedefinition(tag_name).into());
            }
            self.expect(Token::LeftBrace)?;
            let def = self.struct_body()?;
            self.expect(Token::RightBrace)?;
            tag.update(def);
        }
        Ok(ctype)
    }

    /// The members between the braces of a struct or union body. Fills in
    /// offsets and the object size on close.
    fn struct_body(&mut self) -> CompileResult<ObjectDef> {
        // a scratch namespace, just to catch duplicate member names
        let mut members = crate::symbol::Namespace::new("members");
        members.push_scope();

        let mut fields = Vec::new();
        loop {
            let specs = self
                .declaration_specifiers(false)?
                .ok_or(SemanticError::MissingMemberType)?;
            loop {
                let (ctype, name) = self.declarator(specs.ctype.clone())?;
                let name = name.ok_or(SemanticError::InvalidMemberDeclarator)?;
                members.add(Symbol::new(name, ctype.clone(), SymbolKind::Definition, Linkage::None))?;
                fields.push((name, ctype));
                if self.match_next(&Token::Comma).is_none() {
                    break;
                }
            }
            self.expect(Token::Semicolon)?;
            if self.peek_token() == Some(&Token::RightBrace) {
                break;
            }
        }
        Ok(ObjectDef::layout(fields))
    }

    /// ```yacc
    /// enum_specifier
    /// : 'enum' '{' enumerator_list '}'
    /// | 'enum' identifier '{' enumerator_list '}'
    /// | 'enum' identifier
    /// ;
    /// ```
    /// <http://www.quut.com/c/ANSI-C-grammar-y.html#enum_specifier>
    ///
    /// The `enum` keyword itself has already been consumed. Enums are plain
    /// `int`; the tag only exists for redefinition checking.
    fn enum_specifier(&mut self) -> CompileResult<Type> {
        let tag_name = match self.match_id() {
            Some(name) => name,
            None => {
                self.expect(Token::LeftBrace)?;
                self.enumerator_list()?;
                self.expect(Token::RightBrace)?;
                return Ok(Type::int());
            }
        };

        let defining = self.peek_token() == Some(&Token::LeftBrace);
        let tag = match self.tags.lookup(tag_name) {
            // an inner-scope definition shadows the outer tag
            Some(id) if !(defining && id.map(|sym| sym.depth) < self.tags.current_depth()) => {
                if !id.ctype().is_integer() {
                    return Err(SemanticError::TagMismatch(tag_name).into());
                }
                id
            }
            _ => self.tags.add(Symbol::new(
                tag_name,
                Type::int(),
                SymbolKind::Typedef,
                Linkage::None,
            ))?,
        };

        if defining {
            if tag.map(|sym| sym.enum_defined) {
                return Err(SemanticError::TagRedefinition(tag_name).into());
            }
            self.expect(Token::LeftBrace)?;
            self.enumerator_list()?;
            self.expect(Token::RightBrace)?;
            tag.update(|sym| sym.enum_defined = true);
        }
        Ok(Type::int())
    }

    /// ```yacc
    /// enumerator: IDENTIFIER | IDENTIFIER '=' constant_expression ;
    /// ```
    ///
    /// Values count up from zero, or from one past the last explicit value.
    /// Enumerators land in the *identifier* namespace.
    fn enumerator_list(&mut self) -> CompileResult<()> {
        let mut value: i64 = 0;
        loop {
            let name = self.expect_id()?;
            if self.match_next(&Token::Equal).is_some() {
                let explicit = self.constant_expression()?;
                if !explicit.ctype.is_integer() {
                    self.error_handler.warn(Warning::NonIntegerEnum);
                }
                if let Some(&Value::Int(int)) = explicit.value() {
                    value = int;
                }
            }
            let mut sym = Symbol::new(name, Type::int(), SymbolKind::Enum, Linkage::None);
            sym.enum_value = value;
            self.identifiers.add(sym)?;
            value = value.wrapping_add(1);

            if self.peek_token() == Some(&Token::RightBrace) {
                break;
            }
            self.expect(Token::Comma)?;
        }
        Ok(())
    }

    /// ```yacc
    /// declarator: pointer* direct_declarator ;
    /// ```
    ///
    /// Unwinds C's inside-out declarator syntax into the declared type and
    /// the declared name (if any).
    pub(crate) fn declarator(
        &mut self,
        base: Type,
    ) -> CompileResult<(Type, Option<InternedStr>)> {
        let steps = self.declarator_steps(true)?;
        compose(steps, base)
    }

    /// A declarator that must not bind a name: cast and `sizeof` types.
    pub(crate) fn abstract_declarator(&mut self, base: Type) -> CompileResult<Type> {
        let steps = self.declarator_steps(false)?;
        Ok(compose(steps, base)?.0)
    }

    /// Parse one declarator into its layers, ordered so that the head of the
    /// list applies to the base type first.
    ///
    /// `( declarator )` recursion makes suffixes bind inside-out: in
    /// `int (*f)(char)`, the parameter list wraps `int` before the inner
    /// pointer does, yielding "pointer to function (char) returning int".
    fn declarator_steps(&mut self, allow_name: bool) -> CompileResult<Vec<DeclaratorStep>> {
        let _guard = self.recursion_check();
        let mut pointers = Vec::new();
        while self.match_next(&Token::Star).is_some() {
            let mut quals = Qualifiers::NONE;
            loop {
                match self.peek_token() {
                    Some(Token::Keyword(Keyword::Const)) => {
                        self.next_token();
                        quals.c_const = true;
                    }
                    Some(Token::Keyword(Keyword::Volatile)) => {
                        self.next_token();
                        quals.volatile = true;
                    }
                    _ => break,
                }
            }
            pointers.push(quals);
        }

        let mut steps = match self.peek_token() {
            Some(&Token::Id(name)) => {
                self.next_token();
                if !allow_name {
                    return Err(SyntaxError::IdInAbstractDeclarator.into());
                }
                vec![DeclaratorStep::Name(name)]
            }
            Some(Token::LeftParen) => {
                self.next_token();
                let inner = self.declarator_steps(allow_name)?;
                self.expect(Token::RightParen)?;
                inner
            }
            _ => Vec::new(),
        };

        loop {
            match self.peek_token() {
                Some(Token::LeftBracket) => {
                    self.next_token();
                    let length = if self.peek_token() == Some(&Token::RightBracket) {
                        ArrayLength::Incomplete
                    } else {
                        let expr = self.constant_expression()?;
                        match expr.value() {
                            Some(&Value::Int(len)) if expr.ctype.is_integer() && len >= 1 => {
                                ArrayLength::Fixed(len as u64)
                            }
                            Some(&Value::Int(len)) => {
                                return Err(SemanticError::ArrayDimension(len).into())
                            }
                            _ => return Err(SemanticError::ArrayDimension(0).into()),
                        }
                    };
                    self.expect(Token::RightBracket)?;
                    steps.insert(0, DeclaratorStep::Array(length));
                }
                Some(Token::LeftParen) => {
                    self.next_token();
                    let (params, varargs) = self.parameter_list()?;
                    self.expect(Token::RightParen)?;
                    steps.insert(0, DeclaratorStep::Function { params, varargs });
                }
                _ => break,
            }
        }

        for quals in pointers.into_iter().rev() {
            steps.insert(0, DeclaratorStep::Pointer(quals));
        }
        Ok(steps)
    }

    /// ```yacc
    /// parameter_type_list: parameter_list | parameter_list ',' ELLIPSIS ;
    /// ```
    /// <http://www.quut.com/c/ANSI-C-grammar-y.html#parameter_type_list>
    ///
    /// A lone `void` means "no parameters"; array parameters decay to
    /// pointers; parameter names are optional.
    fn parameter_list(&mut self) -> CompileResult<(Vec<Member>, bool)> {
        let mut params = Vec::new();
        let mut varargs = false;
        while self.peek_token() != Some(&Token::RightParen) {
            let base = match self.declaration_specifiers(true)? {
                Some(specs) => specs.ctype,
                None => {
                    let got = match self.peek_token() {
                        Some(token) => token.clone(),
                        None => return Err(SyntaxError::EndOfInput("a parameter").into()),
                    };
                    return Err(SyntaxError::ExpectedType(got).into());
                }
            };
            let (ctype, name) = self.declarator(base)?;
            if ctype == Type::Void {
                break;
            }
            let ctype = match ctype {
                Type::Array(element, _) => Type::pointer(*element),
                other => other,
            };
            params.push(Member {
                name: name.unwrap_or_default(),
                ctype,
                offset: 0,
            });

            if self.peek_token() != Some(&Token::Comma) {
                break;
            }
            self.next_token();
            match self.peek_token() {
                Some(Token::RightParen) => return Err(SyntaxError::TrailingComma.into()),
                Some(Token::Ellipsis) => {
                    self.next_token();
                    varargs = true;
                    break;
                }
                _ => {}
            }
        }
        Ok((params, varargs))
    }

    /// A type-name for casts and `sizeof`: a specifier-qualifier list plus an
    /// optional abstract declarator. `None` if the lookahead is not a type.
    pub(crate) fn type_name(&mut self) -> CompileResult<Option<Type>> {
        let specs = match self.declaration_specifiers(false)? {
            Some(specs) => specs,
            None => return Ok(None),
        };
        let ctype = if self.peek_token() != Some(&Token::RightParen) {
            self.abstract_declarator(specs.ctype)?
        } else {
            specs.ctype
        };
        Ok(Some(ctype))
    }

    /// Parse and emit initializer code for a target variable, as in
    /// `int b[] = {0, 1, 2, 3};`. Aggregate targets recurse member by member
    /// in declaration order, generating assignments against the target at
    /// the member's offset.
    pub(crate) fn initializer(&mut self, cursor: &mut BlockId, mut target: Var) -> CompileResult<()> {
        let _guard = self.recursion_check();
        debug_assert!(matches!(target.kind, VarKind::Direct { .. }));

        if self.match_next(&Token::LeftBrace).is_none() {
            let value = self.assignment_expression(cursor)?;
            let symbol = target.symbol().expect("initializer targets are direct");
            let static_storage =
                symbol.map(|sym| sym.depth == 0 || sym.linkage == Linkage::Internal);
            if static_storage && !value.is_immediate() {
                return Err(SemanticError::NonConstantInit(symbol.name()).into());
            }
            // char s[] = "..." completes the array from the string
            if !target.ctype.is_complete() {
                if let Some(completed) = target.ctype.complete_array_from(&value.ctype) {
                    symbol.update(|sym| sym.ctype = completed.clone());
                    target.ctype = completed;
                }
            }
            self.eval().assign(*cursor, target, value)?;
            return Ok(());
        }

        target.lvalue = true;
        let ctype = target.ctype.clone();
        let base_offset = match target.kind {
            VarKind::Direct { offset, .. } => offset,
            _ => unreachable!("initializer targets are direct"),
        };
        let at = |target: &Var, ctype: Type, offset: u64| {
            let mut element = target.clone();
            element.ctype = ctype;
            if let VarKind::Direct { offset: o, .. } = &mut element.kind {
                *o = offset;
            }
            element
        };

        match &ctype {
            Type::Object(object) => {
                let def = object.def();
                for (i, member) in def.members.iter().enumerate() {
                    let element = at(&target, member.ctype.clone(), base_offset + member.offset);
                    self.initializer(cursor, element)?;
                    if i + 1 < def.members.len() {
                        self.expect(Token::Comma)?;
                    }
                }
            }
            Type::Array(element_type, _) => {
                let element_size = element_type.size();
                let total = ctype.size();
                let mut offset = 0;
                let mut count = 0;
                loop {
                    if total != 0 && offset >= total {
                        break;
                    }
                    let element =
                        at(&target, (**element_type).clone(), base_offset + offset);
                    self.initializer(cursor, element)?;
                    offset += element_size;
                    count += 1;
                    if self.match_next(&Token::Comma).is_none() {
                        break;
                    }
                }
                if total == 0 {
                    // an incomplete array can only be the outermost level of
                    // the target's type, so the element count back-fills the
                    // symbol's own type
                    let symbol = target.symbol().expect("initializer targets are direct");
                    symbol.update(|sym| {
                        if let Type::Array(_, length @ ArrayLength::Incomplete) = &mut sym.ctype {
                            *length = ArrayLength::Fixed(count);
                        }
                    });
                } else if offset < total {
                    self.error_handler.warn(Warning::IncompleteArrayInit);
                }
            }
            _ => return Err(SemanticError::NotAnAggregate(ctype).into()),
        }
        self.expect(Token::RightBrace)?;
        Ok(())
    }
}

/// Apply declarator layers to the base type, head first, collecting the
/// declared name along the way.
fn compose(
    steps: Vec<DeclaratorStep>,
    base: Type,
) -> CompileResult<(Type, Option<InternedStr>)> {
    let mut name = None;
    let mut ctype = base;
    for step in steps {
        ctype = match step {
            DeclaratorStep::Name(n) => {
                name = Some(n);
                ctype
            }
            DeclaratorStep::Pointer(quals) => Type::Pointer(Box::new(ctype), quals),
            DeclaratorStep::Array(length) => {
                // only the outermost dimension may be unspecified
                if !ctype.is_complete() {
                    return Err(SemanticError::IncompleteElementType.into());
                }
                Type::array(ctype, length)
            }
            DeclaratorStep::Function { params, varargs } => Type::Function(FunctionType {
                return_type: Box::new(ctype),
                params,
                varargs,
            }),
        };
    }
    Ok((ctype, name))
}
